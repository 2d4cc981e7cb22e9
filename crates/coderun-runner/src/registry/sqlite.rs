// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed project registry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;
use uuid::Uuid;

use super::{NewProject, Project, ProjectStore};
use crate::error::{Error, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed project store.
#[derive(Clone)]
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database with migrations applied.
    pub async fn in_memory() -> Result<Self> {
        // Each connection to :memory: is its own database, so pin one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    owner_id: String,
    workspace_path: String,
    port: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = Error;

    fn try_from(row: ProjectRow) -> Result<Self> {
        let port = u16::try_from(row.port).map_err(|_| {
            Error::Internal(format!("project {} has invalid port {}", row.id, row.port))
        })?;
        Ok(Project {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            workspace_path: PathBuf::from(row.workspace_path),
            port,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_PROJECT: &str = r#"
    SELECT id, name, owner_id, workspace_path, port, created_at, updated_at
    FROM projects
"#;

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn insert(&self, project: NewProject) -> Result<Project> {
        let now = Utc::now();
        let record = Project {
            id: Uuid::new_v4().to_string(),
            name: project.name,
            owner_id: project.owner_id,
            workspace_path: project.workspace_path,
            port: project.port,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO projects (id, name, owner_id, workspace_path, port, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.owner_id)
        .bind(record.workspace_path.to_string_lossy().into_owned())
        .bind(i64::from(record.port))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(project_id = %record.id, owner_id = %record.owner_id, "Inserted project");
                Ok(record)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Conflict(
                format!("Project '{}' already exists", record.name),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!("{SELECT_PROJECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    async fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "{SELECT_PROJECT} WHERE owner_id = ? AND name = ?"
        ))
        .bind(owner_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "{SELECT_PROJECT} WHERE owner_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Project::try_from).collect()
    }

    async fn assigned_ports(&self) -> Result<Vec<u16>> {
        let ports: Vec<i64> = sqlx::query_scalar("SELECT port FROM projects")
            .fetch_all(&self.pool)
            .await?;
        Ok(ports
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }

    async fn touch(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
