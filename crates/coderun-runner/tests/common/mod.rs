// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for coderun-runner integration tests.
//!
//! Provides a TestContext with an in-memory registry, a temporary storage root
//! and a `sh`-based toolchain standing in for yarn.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coderun_runner::{CommandTemplate, ProjectRunner, SqliteProjectStore, Toolchain};

/// Scaffold script: `$1` is the workspace path.
pub const SCAFFOLD_SCRIPT: &str = r#"mkdir -p "$1/src" "$1/node_modules/react" && printf '%s' '{"name":"app","dependencies":{"react":"^18.2.0"}}' > "$1/package.json" && printf 'export default 1;' > "$1/src/App.js" && : > "$1/yarn.lock""#;

/// Scaffold script that leaves a partial workspace behind and fails.
pub const FAILING_SCAFFOLD_SCRIPT: &str =
    r#"mkdir -p "$1/src" && echo "scaffold exploded" >&2 && exit 1"#;

/// Long-running dev server.
pub const SERVE_SCRIPT: &str = r#"echo "listening on $PORT"; sleep 30"#;

/// Add script: rewrites the manifest with `$1` as the only dependency.
pub const ADD_SCRIPT: &str =
    r#"printf '{"name":"app","dependencies":{"react":"^18.2.0","%s":"^1.0.0"}}' "$1" > package.json"#;

/// Remove script: drops everything but react.
pub const REMOVE_SCRIPT: &str =
    r#"printf '%s' '{"name":"app","dependencies":{"react":"^18.2.0"}}' > package.json"#;

/// Package manager that always fails.
pub const FAILING_TOOL_SCRIPT: &str = r#"echo "error Couldn't find package \"$1\"" >&2; exit 1"#;

/// `sh -c <script> <label> <placeholder>`.
pub fn sh(script: &str, label: &str, placeholder: &str) -> CommandTemplate {
    CommandTemplate::new("sh", ["-c", script, label, placeholder])
}

/// Toolchain backed by `sh` scripts.
pub fn test_toolchain() -> Toolchain {
    Toolchain {
        scaffold: sh(SCAFFOLD_SCRIPT, "scaffold", "{path}"),
        start: sh(SERVE_SCRIPT, "serve", "{port}"),
        add_dependency: sh(ADD_SCRIPT, "add", "{package}"),
        remove_dependency: sh(REMOVE_SCRIPT, "remove", "{package}"),
        scaffold_timeout: Duration::from_secs(20),
        dependency_timeout: Duration::from_secs(20),
    }
}

/// Test context holding a runner and its temporary storage.
pub struct TestContext {
    pub runner: Arc<ProjectRunner>,
    pub storage: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Context with the default test toolchain.
    pub async fn new() -> Self {
        Self::with_toolchain(test_toolchain()).await
    }

    /// Context with a custom toolchain.
    pub async fn with_toolchain(toolchain: Toolchain) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let storage = temp_dir.path().join("storage");
        let store = SqliteProjectStore::in_memory().await.expect("in-memory store");

        let runner = ProjectRunner::builder()
            .store(Arc::new(store))
            .storage_dir(&storage)
            .toolchain(toolchain)
            .stop_grace(Duration::from_secs(2))
            .build()
            .expect("runner");

        Self {
            runner: Arc::new(runner),
            storage,
            _temp_dir: temp_dir,
        }
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check().await
}
