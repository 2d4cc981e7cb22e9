// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External tool invocation.
//!
//! Scaffolding, dev-server start and dependency management all shell out to a
//! package manager. Each invocation is described by a [`CommandTemplate`]: a
//! program plus arguments with `{path}`, `{port}`, `{package}` placeholders.
//! Templates are rendered argument by argument and executed directly, never
//! through a shell, so user-supplied values cannot inject extra commands.

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default scaffolding command.
pub const DEFAULT_SCAFFOLD_COMMAND: &str = "yarn create react-app {path}";
/// Default dev-server start command.
pub const DEFAULT_START_COMMAND: &str = "yarn start --port {port}";
/// Default dependency install command.
pub const DEFAULT_ADD_DEPENDENCY_COMMAND: &str = "yarn add {package}";
/// Default dependency removal command.
pub const DEFAULT_REMOVE_DEPENDENCY_COMMAND: &str = "yarn remove {package}";

/// Default scaffolding timeout.
pub const DEFAULT_SCAFFOLD_TIMEOUT: Duration = Duration::from_secs(600);
/// Default dependency operation timeout.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors from tool invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// Template string had no program.
    #[error("Command template is empty")]
    Empty,

    /// Program could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Program did not finish in time and was killed.
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Program name.
        program: String,
        /// Elapsed limit.
        after: Duration,
    },

    /// Program exited unsuccessfully.
    #[error("{program} exited with code {exit_code}")]
    ExitCode {
        /// Program name.
        program: String,
        /// Exit code, or -1 when killed by a signal.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Waiting for the program failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    /// Best diagnostic text for this failure.
    pub fn diagnostics(&self) -> String {
        match self {
            CommandError::ExitCode { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

/// A program and argument list with placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Build a template from an explicit program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace-separated command line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let program = parts.next().ok_or(CommandError::Empty)?;
        Ok(Self::new(program, parts))
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders substituted.
    pub fn render_args(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    /// Build a ready-to-spawn command.
    pub fn to_command(&self, vars: &[(&str, &str)], cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(vars)).current_dir(cwd);
        cmd
    }
}

impl FromStr for CommandTemplate {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Package-manager commands used by the runner.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Creates a new workspace at `{path}`.
    pub scaffold: CommandTemplate,
    /// Starts the dev server on `{port}` from the workspace directory.
    pub start: CommandTemplate,
    /// Installs `{package}` from the workspace directory.
    pub add_dependency: CommandTemplate,
    /// Removes `{package}` from the workspace directory.
    pub remove_dependency: CommandTemplate,
    /// Limit for scaffolding.
    pub scaffold_timeout: Duration,
    /// Limit for add/remove dependency.
    pub dependency_timeout: Duration,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            scaffold: CommandTemplate::new("yarn", ["create", "react-app", "{path}"]),
            start: CommandTemplate::new("yarn", ["start", "--port", "{port}"]),
            add_dependency: CommandTemplate::new("yarn", ["add", "{package}"]),
            remove_dependency: CommandTemplate::new("yarn", ["remove", "{package}"]),
            scaffold_timeout: DEFAULT_SCAFFOLD_TIMEOUT,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
        }
    }
}

/// Captured output of a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Run a template to completion, capturing output.
///
/// Returns an error unless the program exits with status zero within `timeout`.
/// On timeout the child is killed.
pub async fn run_tool(
    template: &CommandTemplate,
    vars: &[(&str, &str)],
    cwd: &Path,
    timeout: Duration,
) -> Result<ToolOutput, CommandError> {
    let mut cmd = template.to_command(vars, cwd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(
        program = %template.program(),
        cwd = %cwd.display(),
        timeout_secs = timeout.as_secs(),
        "Running tool"
    );

    let child = cmd.spawn().map_err(|source| CommandError::Spawn {
        program: template.program().to_string(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                program = %template.program(),
                timeout_secs = timeout.as_secs(),
                "Tool timed out, killed"
            );
            return Err(CommandError::Timeout {
                program: template.program().to_string(),
                after: timeout,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(CommandError::ExitCode {
            program: template.program().to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(ToolOutput {
        status: output.status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_whitespace() {
        let template = CommandTemplate::parse("  yarn   add {package} ").unwrap();
        assert_eq!(template.program(), "yarn");
        assert_eq!(
            template.render_args(&[("package", "lodash")]),
            vec!["add", "lodash"]
        );
    }

    #[test]
    fn test_parse_empty_template() {
        assert!(matches!(
            CommandTemplate::parse("   "),
            Err(CommandError::Empty)
        ));
    }

    #[test]
    fn test_render_only_replaces_known_placeholders() {
        let template = CommandTemplate::new("sh", ["-c", r#"echo '{"a":1}' {port}"#, "{path}"]);
        let args = template.render_args(&[("port", "4321"), ("path", "/tmp/ws")]);
        assert_eq!(args, vec!["-c", r#"echo '{"a":1}' 4321"#, "/tmp/ws"]);
    }

    #[test]
    fn test_value_with_spaces_stays_one_argument() {
        let template = CommandTemplate::parse("yarn add {package}").unwrap();
        let args = template.render_args(&[("package", "left-pad; rm -rf /")]);
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], "left-pad; rm -rf /");
    }

    #[test]
    fn test_display_and_from_str() {
        let template: CommandTemplate = "yarn start --port {port}".parse().unwrap();
        assert_eq!(template.to_string(), "yarn start --port {port}");
    }

    #[test]
    fn test_default_toolchain_uses_yarn() {
        let toolchain = Toolchain::default();
        assert_eq!(toolchain.scaffold.to_string(), DEFAULT_SCAFFOLD_COMMAND);
        assert_eq!(toolchain.start.to_string(), DEFAULT_START_COMMAND);
        assert_eq!(
            toolchain.add_dependency.to_string(),
            DEFAULT_ADD_DEPENDENCY_COMMAND
        );
        assert_eq!(
            toolchain.remove_dependency.to_string(),
            DEFAULT_REMOVE_DEPENDENCY_COMMAND
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_captures_stderr_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let template = CommandTemplate::new("sh", ["-c", "echo boom >&2; exit 3"]);
        let err = run_tool(&template, &[], dir.path(), Duration::from_secs(10))
            .await
            .unwrap_err();
        match &err {
            CommandError::ExitCode {
                exit_code, stderr, ..
            } => {
                assert_eq!(*exit_code, 3);
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.diagnostics(), "boom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_success_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let template = CommandTemplate::new("sh", ["-c", "pwd; echo {package}"]);
        let output = run_tool(
            &template,
            &[("package", "react")],
            dir.path(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(output.status.success());
        assert!(output.stdout.contains("react"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let template = CommandTemplate::new("sleep", ["5"]);
        let err = run_tool(&template, &[], dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_tool_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let template =
            CommandTemplate::new("definitely-not-a-real-program-xyz", Vec::<String>::new());
        let err = run_tool(&template, &[], dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
