//! Argument-list command execution inside the workspace.
//!
//! Commands are never passed through a shell: the program and its arguments
//! go straight to `execve`, so quoting and metacharacters in arguments are
//! inert. The policy check happens before this runner is reached.

use crate::error::OperationError;
use crate::tools::core::truncate_result;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Captured result of a successful command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Text returned to the model.
    pub fn render(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n[stderr]\n{}", self.stdout, self.stderr)
        }
    }
}

pub struct CommandRunner {
    root: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl CommandRunner {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            root: root.into(),
            timeout,
            max_output_bytes,
        }
    }

    /// Run `program args...` in the workspace root.
    ///
    /// A non-zero exit, a timeout, or a spawn failure is an
    /// [`OperationError::Execution`] whose message carries the output. The
    /// child is killed if the timeout fires or `cancel` is triggered.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, OperationError> {
        debug!("exec: {program} {args:?} in {}", self.root.display());
        let child = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OperationError::execution(format!("failed to start {program}: {e}")))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(OperationError::Cancelled),
            _ = tokio::time::sleep(self.timeout) => {
                return Err(OperationError::execution(format!(
                    "{program} timed out after {}s and was killed",
                    self.timeout.as_secs_f64()
                )));
            }
            result = child.wait_with_output() => result
                .map_err(|e| OperationError::execution(format!("failed to wait for {program}: {e}")))?,
        };

        let half = self.max_output_bytes / 2;
        let stdout = truncate_result(String::from_utf8_lossy(&output.stdout).into_owned(), half);
        let stderr = truncate_result(String::from_utf8_lossy(&output.stderr).into_owned(), half);
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(CommandOutput {
                exit_code,
                stdout,
                stderr,
            })
        } else {
            Err(OperationError::execution(format!(
                "{program} exited with {}:\n{stdout}\n{stderr}",
                output.status
            )))
        }
    }
}
