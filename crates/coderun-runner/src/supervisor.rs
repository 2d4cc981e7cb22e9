// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dev-server process supervision.
//!
//! The supervisor keeps at most one live dev-server process per project. Each
//! process is spawned in its own process group so the whole tree (package
//! manager plus the node server it forks) can be signalled at once.
//!
//! A monitor task owns every child. It waits for either a natural exit or a stop
//! request, reaps the child, removes the table entry and publishes an
//! [`ExitRecord`]. The table entry is keyed by project id and tagged with a run
//! id, so a late exit of an old run never removes a newer one.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::CommandTemplate;
use crate::port;

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Output lines kept per process.
pub const DEFAULT_OUTPUT_TAIL: usize = 200;

/// Errors from the process supervisor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// Working directory is missing.
    #[error("Working directory not found: {0}")]
    WorkingDirNotFound(String),

    /// Dev server could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Spawned child reported no pid.
    #[error("Spawned process has no pid")]
    MissingPid,

    /// Monitor task ended without publishing an exit.
    #[error("Process monitor for {0} ended unexpectedly")]
    MonitorLost(String),
}

impl SupervisorError {
    /// Whether this is a failure to launch the process.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::Spawn { .. }
                | SupervisorError::WorkingDirNotFound(_)
                | SupervisorError::MissingPid
        )
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new process was spawned.
    Started {
        /// OS process id.
        pid: u32,
        /// Port the dev server was told to bind.
        port: u16,
    },
    /// A process was already running; nothing was spawned.
    AlreadyRunning {
        /// OS process id.
        pid: u32,
        /// Port of the running process.
        port: u16,
    },
}

impl StartOutcome {
    /// Port of the running process.
    pub fn port(&self) -> u16 {
        match self {
            StartOutcome::Started { port, .. } | StartOutcome::AlreadyRunning { port, .. } => *port,
        }
    }

    /// Pid of the running process.
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid, .. } | StartOutcome::AlreadyRunning { pid, .. } => *pid,
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was stopped.
    Stopped(ExitRecord),
    /// No process was running.
    NotRunning,
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRecord {
    /// OS process id.
    pub pid: u32,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    /// Whether the exit followed a stop request.
    pub requested: bool,
    /// When the exit was observed.
    pub exited_at: DateTime<Utc>,
}

impl ExitRecord {
    fn from_wait(pid: u32, status: &io::Result<ExitStatus>, requested: bool) -> Self {
        let (code, signal) = match status {
            Ok(status) => (status.code(), exit_signal(status)),
            Err(_) => (None, None),
        };
        Self {
            pid,
            code,
            signal,
            requested,
            exited_at: Utc::now(),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Output stream of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One captured output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    /// Stream the line came from.
    pub stream: OutputStream,
    /// Line text without the trailing newline.
    pub line: String,
}

/// Snapshot of a project's process state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    /// Whether a process is running now.
    pub running: bool,
    /// Pid of the running process.
    pub pid: Option<u32>,
    /// Port of the running process.
    pub port: Option<u16>,
    /// When the running process was started.
    pub started_at: Option<DateTime<Utc>>,
    /// How the previous process ended.
    pub last_exit: Option<ExitRecord>,
    /// Most recent output, oldest first.
    pub recent_output: Vec<OutputLine>,
}

/// Bounded ring of output lines shared with the reader tasks.
#[derive(Debug, Clone)]
struct OutputTail {
    lines: Arc<std::sync::Mutex<VecDeque<OutputLine>>>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, stream: OutputStream, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(OutputLine { stream, line });
    }

    fn snapshot(&self) -> Vec<OutputLine> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

struct RunningProcess {
    run_id: Uuid,
    pid: u32,
    port: u16,
    started_at: DateTime<Utc>,
    output: OutputTail,
    stop_tx: Option<oneshot::Sender<Duration>>,
    exited: watch::Receiver<Option<ExitRecord>>,
}

struct FinishedProcess {
    exit: ExitRecord,
    output: Vec<OutputLine>,
}

#[derive(Default)]
struct ProcessTable {
    running: HashMap<String, RunningProcess>,
    finished: HashMap<String, FinishedProcess>,
}

struct Inner {
    command: CommandTemplate,
    env: Vec<(String, String)>,
    table: Mutex<ProcessTable>,
}

/// Supervises dev-server processes, at most one per project.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor that starts processes with `command`.
    ///
    /// The command is rendered with `{port}` and `{path}`.
    pub fn new(command: CommandTemplate) -> Self {
        Self {
            inner: Arc::new(Inner {
                command,
                env: Vec::new(),
                table: Mutex::new(ProcessTable::default()),
            }),
        }
    }

    /// Add an environment variable for every started process.
    ///
    /// Must be called before the supervisor is shared.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.env.push((key.into(), value.into()));
        }
        self
    }

    /// Start the dev server for a project unless one is already running.
    ///
    /// The table lock is held across the spawn, so concurrent starts of the
    /// same project yield exactly one process.
    pub async fn start(
        &self,
        project_id: &str,
        working_dir: &Path,
        port: u16,
    ) -> Result<StartOutcome, SupervisorError> {
        let mut table = self.inner.table.lock().await;

        if let Some(running) = table.running.get(project_id) {
            debug!(project_id, pid = running.pid, "Project already running");
            return Ok(StartOutcome::AlreadyRunning {
                pid: running.pid,
                port: running.port,
            });
        }

        if !working_dir.is_dir() {
            return Err(SupervisorError::WorkingDirNotFound(
                working_dir.display().to_string(),
            ));
        }

        if !port::is_bindable(port) {
            warn!(
                project_id,
                port, "Assigned port is in use on the host, starting anyway"
            );
        }

        let port_str = port.to_string();
        let path_str = working_dir.to_string_lossy();
        let mut cmd = self
            .inner
            .command
            .to_command(&[("port", &port_str), ("path", &path_str)], working_dir);
        cmd.env("PORT", &port_str)
            .envs(self.inner.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.inner.command.program().to_string(),
            source,
        })?;
        let pid = child.id().ok_or(SupervisorError::MissingPid)?;

        let output = OutputTail::new(DEFAULT_OUTPUT_TAIL);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(
                project_id.to_string(),
                OutputStream::Stdout,
                stdout,
                output.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(
                project_id.to_string(),
                OutputStream::Stderr,
                stderr,
                output.clone(),
            ));
        }

        let run_id = Uuid::new_v4();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        table.running.insert(
            project_id.to_string(),
            RunningProcess {
                run_id,
                pid,
                port,
                started_at: Utc::now(),
                output: output.clone(),
                stop_tx: Some(stop_tx),
                exited: exit_rx,
            },
        );

        tokio::spawn(monitor(
            self.inner.clone(),
            project_id.to_string(),
            run_id,
            pid,
            child,
            stop_rx,
            exit_tx,
            output,
        ));

        info!(project_id, pid, port, "Started dev server");
        Ok(StartOutcome::Started { pid, port })
    }

    /// Stop a project's process: SIGTERM to its group, SIGKILL after `grace`.
    ///
    /// Returns once the process has been reaped and its table entry removed.
    /// Concurrent stops of the same project all observe the same exit.
    pub async fn stop(
        &self,
        project_id: &str,
        grace: Duration,
    ) -> Result<StopOutcome, SupervisorError> {
        let mut exited = {
            let mut table = self.inner.table.lock().await;
            let Some(running) = table.running.get_mut(project_id) else {
                return Ok(StopOutcome::NotRunning);
            };
            if let Some(stop_tx) = running.stop_tx.take() {
                info!(project_id, pid = running.pid, "Stopping dev server");
                let _ = stop_tx.send(grace);
            }
            running.exited.clone()
        };

        let exit = exited
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SupervisorError::MonitorLost(project_id.to_string()))?
            .clone();

        exit.map(StopOutcome::Stopped)
            .ok_or_else(|| SupervisorError::MonitorLost(project_id.to_string()))
    }

    /// Current process state of a project.
    pub async fn status(&self, project_id: &str) -> ProcessStatus {
        let table = self.inner.table.lock().await;
        let last = table.finished.get(project_id);
        let last_exit = last.map(|f| f.exit.clone());

        match table.running.get(project_id) {
            Some(running) => ProcessStatus {
                running: true,
                pid: Some(running.pid),
                port: Some(running.port),
                started_at: Some(running.started_at),
                last_exit,
                recent_output: running.output.snapshot(),
            },
            None => ProcessStatus {
                running: false,
                pid: None,
                port: None,
                started_at: None,
                last_exit,
                recent_output: last.map(|f| f.output.clone()).unwrap_or_default(),
            },
        }
    }

    /// Whether a project has a live process.
    pub async fn is_running(&self, project_id: &str) -> bool {
        self.inner.table.lock().await.running.contains_key(project_id)
    }

    /// Ports held by live processes.
    pub async fn running_ports(&self) -> Vec<u16> {
        let table = self.inner.table.lock().await;
        table.running.values().map(|r| r.port).collect()
    }

    /// Stop every live process. Used on server shutdown.
    pub async fn shutdown(&self, grace: Duration) {
        let project_ids: Vec<String> = {
            let table = self.inner.table.lock().await;
            table.running.keys().cloned().collect()
        };
        if project_ids.is_empty() {
            return;
        }

        info!(count = project_ids.len(), "Stopping all dev servers");
        let mut stops = JoinSet::new();
        for project_id in project_ids {
            let supervisor = self.clone();
            stops.spawn(async move {
                let result = supervisor.stop(&project_id, grace).await;
                (project_id, result)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((project_id, Err(e))) => {
                    error!(project_id = %project_id, error = %e, "Failed to stop dev server");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Stop task panicked"),
            }
        }
    }
}

enum MonitorEvent {
    Exited(io::Result<ExitStatus>),
    StopRequested(Result<Duration, oneshot::error::RecvError>),
}

#[allow(clippy::too_many_arguments)]
async fn monitor(
    inner: Arc<Inner>,
    project_id: String,
    run_id: Uuid,
    pid: u32,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
    output: OutputTail,
) {
    let event = tokio::select! {
        status = child.wait() => MonitorEvent::Exited(status),
        grace = &mut stop_rx => MonitorEvent::StopRequested(grace),
    };

    let (status, requested) = match event {
        MonitorEvent::Exited(status) => (status, false),
        MonitorEvent::StopRequested(Ok(grace)) => {
            (terminate(&project_id, pid, &mut child, grace).await, true)
        }
        // Entry was dropped without a request; keep waiting for the child.
        MonitorEvent::StopRequested(Err(_)) => (child.wait().await, false),
    };

    // Children forked by the dev server share its group and can outlive it.
    signal_group(&project_id, pid, Signal::SIGKILL);

    let exit = ExitRecord::from_wait(pid, &status, requested);
    match &status {
        Ok(status) if requested => {
            info!(project_id = %project_id, pid, status = %status, "Dev server stopped");
        }
        Ok(status) => {
            warn!(project_id = %project_id, pid, status = %status, "Dev server exited");
        }
        Err(e) => {
            error!(project_id = %project_id, pid, error = %e, "Failed to wait for dev server");
        }
    }

    {
        let mut table = inner.table.lock().await;
        if table
            .running
            .get(&project_id)
            .is_some_and(|running| running.run_id == run_id)
        {
            table.running.remove(&project_id);
        }
        table.finished.insert(
            project_id,
            FinishedProcess {
                exit: exit.clone(),
                output: output.snapshot(),
            },
        );
    }

    let _ = exit_tx.send(Some(exit));
}

async fn terminate(
    project_id: &str,
    pid: u32,
    child: &mut Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    if !signal_group(project_id, pid, Signal::SIGTERM) {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                project_id,
                pid,
                grace_secs = grace.as_secs(),
                "Dev server ignored SIGTERM, sending SIGKILL"
            );
            if !signal_group(project_id, pid, Signal::SIGKILL) {
                let _ = child.start_kill();
            }
            child.wait().await
        }
    }
}

/// Signal the process group led by `pid`. Returns false if signalling failed
/// for a reason other than the group being gone.
fn signal_group(project_id: &str, pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(project_id, pid, signal = ?signal, "Signalled process group");
            true
        }
        Err(nix::errno::Errno::ESRCH) => true,
        Err(e) => {
            warn!(project_id, pid, signal = ?signal, error = %e, "Failed to signal process group");
            false
        }
    }
}

async fn forward_output<R>(project_id: String, stream: OutputStream, reader: R, tail: OutputTail)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                match stream {
                    OutputStream::Stdout => {
                        info!(
                            target: "coderun_runner::process",
                            project_id = %project_id,
                            "{}",
                            line
                        )
                    }
                    OutputStream::Stderr => {
                        warn!(
                            target: "coderun_runner::process",
                            project_id = %project_id,
                            "{}",
                            line
                        )
                    }
                }
                tail.push(stream, line);
            }
            Err(e) => {
                debug!(project_id = %project_id, error = %e, "Output stream closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_tail_is_bounded() {
        let tail = OutputTail::new(3);
        for i in 0..5 {
            tail.push(OutputStream::Stdout, format!("line {i}"));
        }
        let lines: Vec<String> = tail.snapshot().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_start_outcome_accessors() {
        let started = StartOutcome::Started {
            pid: 42,
            port: 4000,
        };
        assert_eq!(started.pid(), 42);
        assert_eq!(started.port(), 4000);
        let json = serde_json::to_value(started).unwrap();
        assert_eq!(json["state"], "started");
    }

    #[test]
    fn test_spawn_failure_classification() {
        assert!(SupervisorError::WorkingDirNotFound("/x".into()).is_spawn_failure());
        assert!(!SupervisorError::MonitorLost("p".into()).is_spawn_failure());
    }

    #[tokio::test]
    async fn test_status_of_unknown_project() {
        let supervisor = ProcessSupervisor::new(CommandTemplate::new("true", Vec::<String>::new()));
        let status = supervisor.status("missing").await;
        assert!(!status.running);
        assert!(status.last_exit.is_none());
        assert!(supervisor.running_ports().await.is_empty());
        assert_eq!(
            supervisor.stop("missing", Duration::from_secs(1)).await.unwrap(),
            StopOutcome::NotRunning
        );
    }
}
