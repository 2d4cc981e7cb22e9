// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coderun Runner - Project Workspaces and Dev-Server Supervision
//!
//! This crate is the core of the coderun editor backend. It creates scaffolded
//! web-app projects per user, keeps their files on disk, assigns each one a
//! port, and starts and stops their development servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     coderun-server (HTTP /react)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          ProjectRunner                              │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────────────────┐  │
//! │  │  Project   │ │ Workspace  │ │    Port    │ │     Process      │  │
//! │  │  Registry  │ │   Store    │ │ Allocator  │ │    Supervisor    │  │
//! │  └─────┬──────┘ └─────┬──────┘ └────────────┘ └────────┬─────────┘  │
//! └────────┼──────────────┼────────────────────────────────┼────────────┘
//!          ▼              ▼                                ▼
//!      SQLite        <storage>/<owner>/<name>       yarn start --port N
//!                                                   (own process group)
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_project` | Scaffold a workspace, assign a port, register the project |
//! | `list_projects` | Projects of the caller, oldest first |
//! | `run_project` | Start the dev server, or report the one already running |
//! | `stop_project` | SIGTERM the dev server's group, SIGKILL after a grace period |
//! | `project_status` | Running state, last exit and recent output |
//! | `list_files` | File tree without dependency/build output |
//! | `read_dependencies` | Dependencies declared in `package.json` |
//! | `add_dependency` / `remove_dependency` | Run the package manager |
//! | `rename_file` / `rename_folder` | Move entries inside the workspace |
//! | `update_file_content` | Create or overwrite a file |
//! | `delete_file` | Delete a file or folder |
//!
//! # Modules
//!
//! - [`command`]: Package-manager command templates and tool invocation
//! - [`error`]: Error types and classification
//! - [`port`]: Random port allocation
//! - [`registry`]: Project records (SQLite)
//! - [`runner`]: The orchestrator
//! - [`supervisor`]: Dev-server process supervision
//! - [`workspace`]: Workspace layout and traversal-safe file operations

#![deny(missing_docs)]

/// Package-manager command templates and tool invocation.
pub mod command;

/// Error types for runner operations.
pub mod error;

/// Random port allocation for dev servers.
pub mod port;

/// Durable project records.
pub mod registry;

/// Project lifecycle orchestration.
pub mod runner;

/// Dev-server process supervision.
pub mod supervisor;

/// Workspace layout and file operations.
pub mod workspace;

pub use command::{CommandTemplate, Toolchain};
pub use error::{Error, ErrorKind, Result};
pub use port::PortAllocator;
pub use registry::{NewProject, Project, ProjectStore, SqliteProjectStore};
pub use runner::{ProjectRunner, ProjectRunnerBuilder};
pub use supervisor::{ExitRecord, ProcessStatus, ProcessSupervisor, StartOutcome, StopOutcome};
pub use workspace::{EntryKind, FileNode, FileTree, WriteOutcome};
