//! Short-lived commands run to completion (`exec`, format listing, opener).

use std::process::Stdio;
use std::time::{Duration, Instant};

use media_fetch_host_error::HostError;
use tokio::process::Command;

use crate::spawner::LaunchSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn into_failure(self, launch: &LaunchSpec) -> HostError {
        HostError::CommandFailed {
            command: launch.display(),
            code: self.code,
            stderr: Some(self.stderr),
        }
    }
}

/// Runs `launch` and collects its output. The child is killed if it
/// outlives `timeout`.
pub async fn run_captured(launch: &LaunchSpec, timeout: Duration) -> Result<CapturedOutput, HostError> {
    let started = Instant::now();
    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| HostError::Spawn {
        command: launch.display(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(HostError::io(
                format!("failed to collect output of {}", launch.display()),
                err,
            ))
        }
        Err(_) => {
            tracing::warn!(
                command = %launch.display(),
                timeout_ms = timeout.as_millis() as u64,
                "command timed out; killed"
            );
            return Err(HostError::Timeout {
                command: launch.display(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };

    let captured = CapturedOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    tracing::debug!(
        command = %launch.display(),
        code = ?captured.code,
        stdout_bytes = output.stdout.len(),
        stderr_bytes = output.stderr.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );
    Ok(captured)
}
