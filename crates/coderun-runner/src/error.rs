// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for coderun-runner.

use thiserror::Error;

/// Project runner errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No resolvable caller identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required field is missing or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A project with the same owner and name exists, or a destination path is taken.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Project was not found (or belongs to another owner).
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Path inside a project workspace was not found.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Scaffolding tool failed or did not produce a workspace.
    #[error("Scaffolding failed: {0}")]
    Scaffold(String),

    /// Dependency manifest is missing or unparsable.
    #[error("Invalid dependency manifest: {0}")]
    Manifest(String),

    /// Package manager invocation failed.
    #[error("{message}")]
    DependencyOperationFailed {
        /// Human-readable summary.
        message: String,
        /// Standard error output of the package manager.
        stderr: String,
    },

    /// Project registry operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Process supervisor failed.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// Port allocation failed.
    #[error("Port allocation error: {0}")]
    Port(#[from] crate::port::PortError),

    /// Runner was assembled with missing or invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other error.
    #[error("{0}")]
    Internal(String),
}

/// Coarse error classification used at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller identity missing or invalid.
    Unauthorized,
    /// Missing or invalid input.
    InvalidInput,
    /// Duplicate resource.
    Conflict,
    /// Unknown project or path.
    NotFound,
    /// Filesystem or scaffolding failure.
    Io,
    /// Package manager failure.
    DependencyOperationFailed,
    /// Anything unanticipated.
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::ProjectNotFound(_) | Error::PathNotFound(_) => ErrorKind::NotFound,
            Error::Io(_) | Error::Scaffold(_) | Error::Manifest(_) => ErrorKind::Io,
            Error::Supervisor(e) if e.is_spawn_failure() => ErrorKind::Io,
            Error::DependencyOperationFailed { .. } => ErrorKind::DependencyOperationFailed,
            Error::Database(_)
            | Error::Migration(_)
            | Error::Supervisor(_)
            | Error::Port(_)
            | Error::Configuration(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Diagnostic output attached to the error, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Error::DependencyOperationFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type using the runner Error.
pub type Result<T> = std::result::Result<T, Error>;
