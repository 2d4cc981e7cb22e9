// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Project registry.
//!
//! Durable records of created projects. The [`ProjectStore`] trait is the seam
//! between the runner and the database; [`SqliteProjectStore`] is the shipped
//! implementation.

mod sqlite;

pub use sqlite::SqliteProjectStore;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A registered project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique id.
    pub id: String,
    /// Name, unique per owner.
    pub name: String,
    /// Owning user.
    pub owner_id: String,
    /// Absolute path of the workspace directory.
    pub workspace_path: PathBuf,
    /// Dev-server port, fixed at creation.
    pub port: u16,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last file or dependency change.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Project name.
    pub name: String,
    /// Owning user.
    pub owner_id: String,
    /// Workspace directory.
    pub workspace_path: PathBuf,
    /// Assigned port.
    pub port: u16,
}

/// Persistence for project records.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a project. Fails with `Conflict` if the owner already has a
    /// project of that name.
    async fn insert(&self, project: NewProject) -> Result<Project>;

    /// Fetch by id.
    async fn get(&self, id: &str) -> Result<Option<Project>>;

    /// Fetch by owner and name.
    async fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Project>>;

    /// All projects of an owner, oldest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>>;

    /// Ports assigned to any project.
    async fn assigned_ports(&self) -> Result<Vec<u16>>;

    /// Bump `updated_at`.
    async fn touch(&self, id: &str) -> Result<()>;
}
