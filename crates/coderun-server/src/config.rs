// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for coderun-server.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use coderun_runner::command::{
    DEFAULT_ADD_DEPENDENCY_COMMAND, DEFAULT_REMOVE_DEPENDENCY_COMMAND, DEFAULT_SCAFFOLD_COMMAND,
    DEFAULT_START_COMMAND,
};
use coderun_runner::port::DEFAULT_RESERVED_PORTS;
use coderun_runner::{CommandTemplate, Toolchain};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Read `CODERUN_LOG_FORMAT`; anything but `json` means text.
    ///
    /// Read separately from [`Config`] so tracing is up before configuration
    /// errors need reporting.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("CODERUN_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// SQLite database file for the project registry
    pub database_path: PathBuf,
    /// Root directory for project workspaces
    pub storage_dir: PathBuf,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Ports never assigned to projects: the built-in reserved ports, any
    /// extra ones configured, and the server's own port
    pub reserved_ports: Vec<u16>,
    /// Package-manager commands and timeouts
    pub toolchain: Toolchain,
    /// Wait between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// Allowed browser origin
    pub cors_origin: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr: SocketAddr = var("CODERUN_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .map_err(|_| ConfigError::invalid("CODERUN_BIND_ADDR", "expected host:port"))?;

        let database_path = PathBuf::from(
            var("CODERUN_DATABASE_PATH").unwrap_or_else(|| ".data/coderun.db".to_string()),
        );

        let storage_dir = PathBuf::from(
            var("CODERUN_STORAGE_DIR").unwrap_or_else(|| ".data/storage".to_string()),
        );

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::MissingEnvVar("JWT_SECRET"))?;

        let extra_ports = match var("CODERUN_RESERVED_PORTS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<u16>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| {
                    ConfigError::invalid("CODERUN_RESERVED_PORTS", "expected comma-separated ports")
                })?,
            None => Vec::new(),
        };
        let reserved_ports: Vec<u16> = DEFAULT_RESERVED_PORTS
            .iter()
            .copied()
            .chain(extra_ports)
            .chain([bind_addr.port()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let template = |key: &'static str, default: &str| {
            CommandTemplate::parse(&var(key).unwrap_or_else(|| default.to_string()))
                .map_err(|e| ConfigError::invalid(key, e.to_string()))
        };
        let seconds = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match var(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::invalid(key, "expected whole seconds")),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let toolchain = Toolchain {
            scaffold: template("CODERUN_SCAFFOLD_CMD", DEFAULT_SCAFFOLD_COMMAND)?,
            start: template("CODERUN_START_CMD", DEFAULT_START_COMMAND)?,
            add_dependency: template("CODERUN_ADD_DEP_CMD", DEFAULT_ADD_DEPENDENCY_COMMAND)?,
            remove_dependency: template(
                "CODERUN_REMOVE_DEP_CMD",
                DEFAULT_REMOVE_DEPENDENCY_COMMAND,
            )?,
            scaffold_timeout: seconds("CODERUN_SCAFFOLD_TIMEOUT_SECS", 600)?,
            dependency_timeout: seconds("CODERUN_DEPENDENCY_TIMEOUT_SECS", 300)?,
        };

        let stop_grace = seconds("CODERUN_STOP_GRACE_SECS", 5)?;

        let cors_origin =
            var("CODERUN_CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5000".to_string());
        if HeaderValue::from_str(&cors_origin).is_err() {
            return Err(ConfigError::invalid(
                "CODERUN_CORS_ORIGIN",
                "not a valid header value",
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            storage_dir,
            jwt_secret,
            reserved_ports,
            toolchain,
            stop_grace,
            cors_origin,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// What was wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            var,
            reason: reason.into(),
        }
    }
}
