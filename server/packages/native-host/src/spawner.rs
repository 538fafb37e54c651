//! Launching child processes for the supervisor.
//!
//! The supervisor never touches `tokio::process` directly: it asks a
//! [`ProcessSpawner`] for a [`SpawnedProcess`], which is just a stream of
//! output chunks, an exit future and a terminate handle. Tests plug in the
//! fake from [`crate::testing`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use media_fetch_host_error::HostError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Shell-quoted command line, for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(self.program.to_string_lossy().as_ref()));
        for arg in &self.args {
            parts.push(shell_quote(arg));
        }
        parts.join(" ")
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    /// Terminated by a signal, or killed on request where the platform has
    /// no signals.
    Signal(Option<i32>),
}

impl ExitReason {
    fn from_status(status: ExitStatus, terminate_requested: bool) -> Self {
        if let Some(code) = status.code() {
            if terminate_requested && cfg!(not(unix)) {
                return Self::Signal(None);
            }
            return Self::Code(code);
        }
        Self::Signal(exit_signal(&status))
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

/// One-shot request to stop a child. Dropping it without calling
/// [`TerminateHandle::terminate`] leaves the child running.
#[derive(Debug)]
pub struct TerminateHandle(oneshot::Sender<()>);

impl TerminateHandle {
    pub fn new(sender: oneshot::Sender<()>) -> Self {
        Self(sender)
    }

    /// Returns false if the child has already been reaped.
    pub fn terminate(self) -> bool {
        self.0.send(()).is_ok()
    }
}

pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub output: BoxStream<'static, OutputChunk>,
    pub exit: BoxFuture<'static, ExitReason>,
    pub terminate: TerminateHandle,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

pub trait ProcessSpawner: Send + Sync + 'static {
    fn spawn(&self, launch: &LaunchSpec) -> Result<SpawnedProcess, HostError>;
}

/// Spawns real OS processes with piped output and a null stdin, so the
/// child can never read from or write to the messaging channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, launch: &LaunchSpec) -> Result<SpawnedProcess, HostError> {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Children must not outlive the host if the runtime goes away
            // before a requested SIGTERM is delivered.
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            tracing::error!(
                program = ?launch.program,
                args = ?launch.args,
                error = %source,
                "failed to spawn child process"
            );
            HostError::Spawn {
                command: launch.display(),
                source,
            }
        })?;

        let pid = child.id();
        let missing = |stream: &str| HostError::Internal {
            message: format!("child {stream} was not captured"),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let output = stream::select(
            read_chunks(stdout, OutputStream::Stdout),
            read_chunks(stderr, OutputStream::Stderr),
        )
        .boxed();

        let (terminate_tx, terminate_rx) = oneshot::channel();
        Ok(SpawnedProcess {
            pid,
            output,
            exit: wait_for_exit(child, terminate_rx).boxed(),
            terminate: TerminateHandle::new(terminate_tx),
        })
    }
}

fn read_chunks<R>(reader: R, stream: OutputStream) -> BoxStream<'static, OutputChunk>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let state = (reader, vec![0u8; READ_CHUNK_BYTES], Vec::new(), false);
    stream::unfold(
        state,
        move |(mut reader, mut buf, mut pending, done)| async move {
            loop {
                if done {
                    return None;
                }
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        if pending.is_empty() {
                            return None;
                        }
                        let text = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        return Some((OutputChunk { stream, text }, (reader, buf, pending, true)));
                    }
                    Ok(read) => {
                        pending.extend_from_slice(&buf[..read]);
                        let text = take_utf8(&mut pending);
                        if text.is_empty() {
                            continue;
                        }
                        return Some((OutputChunk { stream, text }, (reader, buf, pending, false)));
                    }
                    Err(err) => {
                        tracing::warn!(stream = stream.as_str(), error = %err, "child output read failed");
                        return None;
                    }
                }
            }
        },
    )
    .boxed()
}

/// Decodes the complete part of `pending`, leaving a trailing partial
/// multibyte sequence for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let complete = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(complete);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

async fn wait_for_exit(mut child: Child, mut terminate_rx: oneshot::Receiver<()>) -> ExitReason {
    let terminate_requested = tokio::select! {
        status = child.wait() => return exit_reason(status, false),
        received = &mut terminate_rx => received.is_ok(),
    };
    if terminate_requested {
        send_terminate(&mut child);
    }
    exit_reason(child.wait().await, terminate_requested)
}

fn exit_reason(status: std::io::Result<ExitStatus>, terminate_requested: bool) -> ExitReason {
    match status {
        Ok(status) => ExitReason::from_status(status, terminate_requested),
        Err(err) => {
            tracing::error!(error = %err, "failed to get child exit status");
            if terminate_requested {
                ExitReason::Signal(None)
            } else {
                ExitReason::Code(-1)
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SIGTERM lets the tool clean up its partial files.
        let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if rc != 0 {
            tracing::warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "failed to send SIGTERM"
            );
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        tracing::warn!(pid = ?child.id(), error = %err, "failed to kill child");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments() {
        let launch = LaunchSpec::new(
            "/usr/bin/yt-dlp",
            vec!["-o".to_string(), "/out/it's.mp4".to_string()],
        );
        assert_eq!(launch.display(), r"'/usr/bin/yt-dlp' '-o' '/out/it'\''s.mp4'");
    }

    #[test]
    fn split_multibyte_character_waits_for_next_read() {
        let bytes = "45.0% é".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);

        let mut pending = head.to_vec();
        assert_eq!(take_utf8(&mut pending), "45.0% ");
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(tail);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced_not_held() {
        let mut pending = vec![b'a', 0xff, b'b'];
        assert_eq!(take_utf8(&mut pending), "a\u{fffd}b");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let launch = LaunchSpec::new("/definitely/not/a/tool", Vec::new());
        let err = TokioSpawner.spawn(&launch).unwrap_err();
        assert!(matches!(err, HostError::Spawn { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_output_and_exit_code() {
        let launch = LaunchSpec::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
        );
        let spawned = TokioSpawner.spawn(&launch).unwrap();
        assert!(spawned.pid.is_some());
        let chunks: Vec<OutputChunk> = spawned.output.collect().await;
        let stdout: String = chunks
            .iter()
            .filter(|c| c.stream == OutputStream::Stdout)
            .map(|c| c.text.as_str())
            .collect();
        let stderr: String = chunks
            .iter()
            .filter(|c| c.stream == OutputStream::Stderr)
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, "err\n");
        assert_eq!(spawned.exit.await, ExitReason::Code(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_reports_signal() {
        let launch = LaunchSpec::new("/bin/sh", vec!["-c".to_string(), "exec sleep 30".to_string()]);
        let spawned = TokioSpawner.spawn(&launch).unwrap();
        assert!(spawned.terminate.terminate());
        let reason = tokio::time::timeout(std::time::Duration::from_secs(5), spawned.exit)
            .await
            .expect("child exits after SIGTERM");
        assert_eq!(reason, ExitReason::Signal(Some(libc::SIGTERM)));
    }
}
