// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Project runner.
//!
//! Orchestrates the registry, workspaces, port allocation, package-manager
//! tooling and the process supervisor. Every operation is scoped to an owner: a
//! project owned by someone else is reported as not found.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{info, instrument, warn};

use crate::command::{self, CommandError, CommandTemplate, Toolchain};
use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::registry::{NewProject, Project, ProjectStore};
use crate::supervisor::{
    DEFAULT_STOP_GRACE, ProcessStatus, ProcessSupervisor, StartOutcome, StopOutcome,
};
use crate::workspace::{EntryKind, FileTree, Workspace, WorkspaceStore, WriteOutcome};

/// Longest accepted package spec, e.g. `@scope/name@^1.2.3`.
const MAX_PACKAGE_SPEC_LEN: usize = 214;

/// Builder for [`ProjectRunner`].
#[derive(Default)]
pub struct ProjectRunnerBuilder {
    store: Option<Arc<dyn ProjectStore>>,
    storage_dir: Option<PathBuf>,
    toolchain: Option<Toolchain>,
    ports: Option<PortAllocator>,
    stop_grace: Option<Duration>,
    process_env: Vec<(String, String)>,
}

impl ProjectRunnerBuilder {
    /// Project registry (required).
    pub fn store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Root directory for workspaces (required).
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Package-manager commands. Defaults to yarn.
    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Port allocator. Defaults to [`PortAllocator::new`].
    pub fn ports(mut self, ports: PortAllocator) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Wait between SIGTERM and SIGKILL when stopping.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }

    /// Extra environment variable for dev-server processes.
    pub fn process_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.process_env.push((key.into(), value.into()));
        self
    }

    /// Build the runner.
    pub fn build(self) -> Result<ProjectRunner> {
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("project store is required".to_string()))?;
        let storage_dir = self
            .storage_dir
            .ok_or_else(|| Error::Configuration("storage directory is required".to_string()))?;
        let toolchain = self.toolchain.unwrap_or_default();

        let supervisor = self
            .process_env
            .into_iter()
            .fold(ProcessSupervisor::new(toolchain.start.clone()), |s, (k, v)| {
                s.with_env(k, v)
            });

        Ok(ProjectRunner {
            store,
            workspaces: WorkspaceStore::new(storage_dir)?,
            toolchain,
            ports: self.ports.unwrap_or_default(),
            supervisor,
            stop_grace: self.stop_grace.unwrap_or(DEFAULT_STOP_GRACE),
            creating: std::sync::Mutex::new(HashSet::new()),
            allocation: tokio::sync::Mutex::new(()),
        })
    }
}

/// Project lifecycle orchestrator.
pub struct ProjectRunner {
    store: Arc<dyn ProjectStore>,
    workspaces: WorkspaceStore,
    toolchain: Toolchain,
    ports: PortAllocator,
    supervisor: ProcessSupervisor,
    stop_grace: Duration,
    /// `(owner, name)` pairs with a create in flight.
    creating: std::sync::Mutex<HashSet<(String, String)>>,
    /// Serializes port allocation with the registry insert.
    allocation: tokio::sync::Mutex<()>,
}

impl ProjectRunner {
    /// Start building a runner.
    pub fn builder() -> ProjectRunnerBuilder {
        ProjectRunnerBuilder::default()
    }

    /// Process supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Workspace store.
    pub fn workspaces(&self) -> &WorkspaceStore {
        &self.workspaces
    }

    /// Scaffold, allocate a port and register a new project.
    ///
    /// Either everything happens or nothing does: on any failure the partially
    /// scaffolded directory is removed and no record is written.
    #[instrument(skip(self))]
    pub async fn create_project(&self, owner_id: &str, name: &str) -> Result<Project> {
        let name = name.trim();
        let workspace_path = self.workspaces.project_path(owner_id, name)?;

        if self.store.find_by_name(owner_id, name).await?.is_some() {
            return Err(Error::Conflict(format!("Project '{name}' already exists")));
        }
        let _reservation = CreateReservation::acquire(&self.creating, owner_id, name)?;

        if tokio::fs::try_exists(&workspace_path).await? {
            return Err(Error::Conflict(format!(
                "Workspace for '{name}' already exists"
            )));
        }

        let owner_dir = self.workspaces.prepare_owner_dir(owner_id).await?;
        let mut guard = WorkspaceGuard::new(workspace_path.clone());
        let created: Result<Project> = async {
            self.scaffold(&owner_dir, &workspace_path, name).await?;

            let _allocation = self.allocation.lock().await;
            let port = self.ports.allocate_excluding(&self.taken_ports().await?)?;
            self.store
                .insert(NewProject {
                    name: name.to_string(),
                    owner_id: owner_id.to_string(),
                    workspace_path: workspace_path.clone(),
                    port,
                })
                .await
        }
        .await;

        match created {
            Ok(project) => {
                guard.commit();
                info!(project_id = %project.id, port = project.port, "Project created");
                Ok(project)
            }
            Err(e) => {
                guard.discard().await;
                Err(e)
            }
        }
    }

    /// All projects of an owner, oldest first.
    pub async fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>> {
        self.store.list_by_owner(owner_id).await
    }

    /// Fetch one of the owner's projects.
    pub async fn project(&self, owner_id: &str, project_id: &str) -> Result<Project> {
        match self.store.get(project_id).await? {
            Some(project) if project.owner_id == owner_id => Ok(project),
            _ => Err(Error::ProjectNotFound(project_id.to_string())),
        }
    }

    /// Start the project's dev server, or report the one already running.
    #[instrument(skip(self))]
    pub async fn run_project(&self, owner_id: &str, project_id: &str) -> Result<StartOutcome> {
        let project = self.project(owner_id, project_id).await?;
        let outcome = self
            .supervisor
            .start(&project.id, &project.workspace_path, project.port)
            .await?;
        Ok(outcome)
    }

    /// Stop the project's dev server.
    #[instrument(skip(self))]
    pub async fn stop_project(&self, owner_id: &str, project_id: &str) -> Result<StopOutcome> {
        let project = self.project(owner_id, project_id).await?;
        Ok(self.supervisor.stop(&project.id, self.stop_grace).await?)
    }

    /// Process state of the project's dev server.
    pub async fn project_status(&self, owner_id: &str, project_id: &str) -> Result<ProcessStatus> {
        let project = self.project(owner_id, project_id).await?;
        Ok(self.supervisor.status(&project.id).await)
    }

    /// File tree of the project's workspace.
    pub async fn list_files(&self, owner_id: &str, project_id: &str) -> Result<FileTree> {
        self.workspace(owner_id, project_id).await?.file_tree().await
    }

    /// Declared dependencies of the project.
    pub async fn read_dependencies(
        &self,
        owner_id: &str,
        project_id: &str,
    ) -> Result<IndexMap<String, String>> {
        self.workspace(owner_id, project_id)
            .await?
            .read_dependencies()
            .await
    }

    /// Install a dependency with the package manager.
    #[instrument(skip(self))]
    pub async fn add_dependency(
        &self,
        owner_id: &str,
        project_id: &str,
        dependency: &str,
    ) -> Result<()> {
        validate_package_spec(dependency)?;
        let project = self.project(owner_id, project_id).await?;
        self.run_dependency_tool(&self.toolchain.add_dependency, &project, dependency, "add")
            .await
    }

    /// Remove a dependency with the package manager.
    #[instrument(skip(self))]
    pub async fn remove_dependency(
        &self,
        owner_id: &str,
        project_id: &str,
        dependency: &str,
    ) -> Result<()> {
        validate_package_spec(dependency)?;
        let project = self.project(owner_id, project_id).await?;
        self.run_dependency_tool(
            &self.toolchain.remove_dependency,
            &project,
            dependency,
            "remove",
        )
        .await
    }

    /// Rename or move a file.
    pub async fn rename_file(
        &self,
        owner_id: &str,
        project_id: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        self.rename_entry(owner_id, project_id, from, to, EntryKind::File)
            .await
    }

    /// Rename or move a folder.
    pub async fn rename_folder(
        &self,
        owner_id: &str,
        project_id: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        self.rename_entry(owner_id, project_id, from, to, EntryKind::Folder)
            .await
    }

    /// Create or overwrite a file.
    pub async fn update_file_content(
        &self,
        owner_id: &str,
        project_id: &str,
        path: &str,
        content: &str,
    ) -> Result<WriteOutcome> {
        let project = self.project(owner_id, project_id).await?;
        let outcome = Workspace::open(&project.workspace_path)
            .write_file(path, content)
            .await?;
        self.store.touch(&project.id).await?;
        Ok(outcome)
    }

    /// Delete a file or folder.
    pub async fn delete_file(&self, owner_id: &str, project_id: &str, path: &str) -> Result<()> {
        let project = self.project(owner_id, project_id).await?;
        Workspace::open(&project.workspace_path)
            .delete(path)
            .await?;
        self.store.touch(&project.id).await
    }

    /// Stop every dev server.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown(self.stop_grace).await;
    }

    async fn workspace(&self, owner_id: &str, project_id: &str) -> Result<Workspace> {
        let project = self.project(owner_id, project_id).await?;
        Ok(Workspace::open(project.workspace_path))
    }

    async fn rename_entry(
        &self,
        owner_id: &str,
        project_id: &str,
        from: &str,
        to: &str,
        kind: EntryKind,
    ) -> Result<()> {
        let project = self.project(owner_id, project_id).await?;
        Workspace::open(&project.workspace_path)
            .rename(from, to, kind)
            .await?;
        self.store.touch(&project.id).await
    }

    async fn taken_ports(&self) -> Result<HashSet<u16>> {
        let mut taken: HashSet<u16> = self.store.assigned_ports().await?.into_iter().collect();
        taken.extend(self.supervisor.running_ports().await);
        Ok(taken)
    }

    async fn scaffold(&self, owner_dir: &Path, workspace_path: &Path, name: &str) -> Result<()> {
        let path = workspace_path.to_string_lossy();
        info!(path = %path, "Scaffolding workspace");

        command::run_tool(
            &self.toolchain.scaffold,
            &[("path", &path), ("name", name)],
            owner_dir,
            self.toolchain.scaffold_timeout,
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Scaffolding failed");
            Error::Scaffold(e.diagnostics())
        })?;

        if !tokio::fs::metadata(workspace_path)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(Error::Scaffold(
                "scaffolding tool did not create the workspace".to_string(),
            ));
        }
        Ok(())
    }

    async fn run_dependency_tool(
        &self,
        template: &CommandTemplate,
        project: &Project,
        dependency: &str,
        verb: &str,
    ) -> Result<()> {
        let result = command::run_tool(
            template,
            &[("package", dependency)],
            &project.workspace_path,
            self.toolchain.dependency_timeout,
        )
        .await;

        match result {
            Ok(_) => {
                info!(project_id = %project.id, dependency, verb, "Dependency updated");
                self.store.touch(&project.id).await
            }
            Err(e) => {
                warn!(
                    project_id = %project.id,
                    dependency,
                    verb,
                    error = %e,
                    "Dependency operation failed"
                );
                Err(dependency_failure(verb, dependency, e))
            }
        }
    }
}

fn dependency_failure(verb: &str, dependency: &str, error: CommandError) -> Error {
    Error::DependencyOperationFailed {
        message: format!("Failed to {verb} dependency {dependency}"),
        stderr: error.diagnostics(),
    }
}

/// Accept package specs like `react`, `@scope/pkg`, `lodash@4.17.21`.
fn validate_package_spec(spec: &str) -> Result<()> {
    if spec.is_empty() {
        return Err(Error::InvalidInput("dependency is required".to_string()));
    }
    if spec.len() > MAX_PACKAGE_SPEC_LEN {
        return Err(Error::InvalidInput(format!(
            "dependency must be at most {MAX_PACKAGE_SPEC_LEN} characters"
        )));
    }
    if spec.starts_with('-') || spec.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "'{spec}' is not a valid package name"
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || "@/._-~^<>=*:+".contains(c);
    if !spec.chars().all(allowed) {
        return Err(Error::InvalidInput(format!(
            "'{spec}' is not a valid package name"
        )));
    }
    Ok(())
}

/// Marks an `(owner, name)` pair as being created; released on drop.
struct CreateReservation<'a> {
    set: &'a std::sync::Mutex<HashSet<(String, String)>>,
    key: (String, String),
}

impl<'a> CreateReservation<'a> {
    fn acquire(
        set: &'a std::sync::Mutex<HashSet<(String, String)>>,
        owner_id: &str,
        name: &str,
    ) -> Result<Self> {
        let key = (owner_id.to_string(), name.to_string());
        let mut in_flight = set.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key.clone()) {
            return Err(Error::Conflict(format!(
                "Project '{name}' is already being created"
            )));
        }
        Ok(Self { set, key })
    }
}

impl Drop for CreateReservation<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.set.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}

/// Removes a workspace directory unless committed.
///
/// Error paths call [`WorkspaceGuard::discard`]; the drop fallback only runs
/// when the create future itself is cancelled.
struct WorkspaceGuard {
    path: PathBuf,
    committed: bool,
}

impl WorkspaceGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }

    async fn discard(mut self) {
        self.committed = true;
        log_removal(&self.path, tokio::fs::remove_dir_all(&self.path).await);
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let result = std::fs::remove_dir_all(&path);
                    log_removal(&path, result);
                });
            }
            Err(_) => {
                let result = std::fs::remove_dir_all(&path);
                log_removal(&path, result);
            }
        }
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => info!(path = %path.display(), "Removed partial workspace"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove partial workspace")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_spec_validation() {
        for ok in ["react", "@mui/material", "lodash@4.17.21", "react-dom@^18.2.0"] {
            assert!(validate_package_spec(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "--global", "a b", "x;rm -rf /", "$(id)", ".hidden", "`id`"] {
            assert!(
                matches!(validate_package_spec(bad), Err(Error::InvalidInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_reservation_blocks_concurrent_create() {
        let set = std::sync::Mutex::new(HashSet::new());
        let first = CreateReservation::acquire(&set, "u1", "app").unwrap();
        assert!(matches!(
            CreateReservation::acquire(&set, "u1", "app"),
            Err(Error::Conflict(_))
        ));
        assert!(CreateReservation::acquire(&set, "u2", "app").is_ok());
        drop(first);
        assert!(CreateReservation::acquire(&set, "u1", "app").is_ok());
    }

    #[test]
    fn test_workspace_guard_removes_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("doomed");
        let kept = dir.path().join("kept");
        std::fs::create_dir_all(doomed.join("src")).unwrap();
        std::fs::create_dir_all(&kept).unwrap();

        drop(WorkspaceGuard::new(doomed.clone()));
        let mut guard = WorkspaceGuard::new(kept.clone());
        guard.commit();
        drop(guard);

        assert!(!doomed.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_workspace_guard_discard_removes_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("doomed");
        std::fs::create_dir_all(doomed.join("node_modules/react")).unwrap();
        std::fs::write(doomed.join("node_modules/react/index.js"), "x").unwrap();

        WorkspaceGuard::new(doomed.clone()).discard().await;
        assert!(!doomed.exists());
    }

    #[tokio::test]
    async fn test_workspace_guard_drop_inside_runtime_removes_off_thread() {
        let dir = tempfile::tempdir().unwrap();
        let doomed = dir.path().join("doomed");
        std::fs::create_dir_all(doomed.join("src")).unwrap();

        drop(WorkspaceGuard::new(doomed.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while doomed.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!doomed.exists());
    }

    #[test]
    fn test_builder_requires_store() {
        let err = ProjectRunner::builder()
            .storage_dir("/tmp/coderun")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
