// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coderun Server - HTTP API for the Project Runner
//!
//! Exposes [`coderun_runner::ProjectRunner`] over HTTP for the editor front
//! end. Callers authenticate with a bearer JWT carrying a `userId` claim; every
//! project operation is scoped to that user.
//!
//! # Routes
//!
//! | Method & Path | Operation |
//! |---------------|-----------|
//! | `POST /react` | Create a project (`name`) |
//! | `GET /react` | List the caller's projects |
//! | `GET /react/{id}/dependencies` | Read declared dependencies |
//! | `POST /react/{id}/dependencies` | Add a dependency (`dependency`) |
//! | `DELETE /react/{id}/dependencies` | Remove a dependency (`dependency`) |
//! | `POST /react/{id}/run` | Start the dev server |
//! | `POST /react/{id}/stop` | Stop the dev server |
//! | `GET /react/{id}/status` | Dev-server state and recent output |
//! | `GET /react/{id}/files` | File tree |
//! | `PUT /react/{id}/files/name` | Rename a file (`oldFilename`, `newFilename`) |
//! | `PUT /react/{id}/files/content` | Create or overwrite a file (`filename`, `content`) |
//! | `PUT /react/{id}/folders/name` | Rename a folder (`oldFoldername`, `newFoldername`) |
//! | `DELETE /react/{id}/files` | Delete a file or folder (`filename`) |
//! | `GET /health` | Liveness probe, unauthenticated |
//!
//! # Configuration
//!
//! See [`config::Config`]. `JWT_SECRET` is the only required variable.

#![deny(missing_docs)]

/// HTTP routes, shared state and error responses.
pub mod api;

/// Bearer token identity resolution.
pub mod auth;

/// Server configuration loaded from environment variables.
pub mod config;

pub use api::{ApiError, AppState, build_router, cors_layer};
pub use config::{Config, ConfigError, LogFormat};
