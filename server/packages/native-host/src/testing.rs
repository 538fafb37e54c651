//! In-memory process spawner for driving the supervisor without launching
//! executables.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::{FutureExt, StreamExt};
use media_fetch_host_error::HostError;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::spawner::{
    ExitReason, LaunchSpec, OutputChunk, OutputStream, ProcessSpawner, SpawnedProcess,
    TerminateHandle,
};

/// Test-side controls for one fake child.
#[derive(Debug)]
pub struct FakeProcess {
    pub launch: LaunchSpec,
    output: Option<mpsc::UnboundedSender<OutputChunk>>,
    exit: Option<oneshot::Sender<ExitReason>>,
    terminate: oneshot::Receiver<()>,
}

impl FakeProcess {
    pub fn stdout(&self, text: &str) {
        self.emit(OutputStream::Stdout, text);
    }

    pub fn stderr(&self, text: &str) {
        self.emit(OutputStream::Stderr, text);
    }

    fn emit(&self, stream: OutputStream, text: &str) {
        if let Some(output) = &self.output {
            let _ = output.send(OutputChunk {
                stream,
                text: text.to_string(),
            });
        }
    }

    /// Closes the output pipes and lets the exit future resolve.
    pub fn exit(&mut self, reason: ExitReason) {
        self.output.take();
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(reason);
        }
    }

    /// Resolves the exit future while the output pipes stay open, as when a
    /// grandchild inherited them.
    pub fn exit_keeping_output(&mut self, reason: ExitReason) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(reason);
        }
    }

    /// Whether the supervisor asked this child to stop.
    pub fn terminate_requested(&mut self) -> bool {
        matches!(self.terminate.try_recv(), Ok(()))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    spawned: VecDeque<FakeProcess>,
    fail_next: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeSpawner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next spawn fail as if the executable were missing.
    pub fn fail_next_spawn(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = Some(message.to_string());
        }
    }

    /// Oldest spawned child not yet taken by the test.
    pub fn take_spawned(&self) -> Option<FakeProcess> {
        self.state.lock().ok()?.spawned.pop_front()
    }

    pub fn spawned_count(&self) -> usize {
        self.state.lock().map(|state| state.spawned.len()).unwrap_or(0)
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, launch: &LaunchSpec) -> Result<SpawnedProcess, HostError> {
        let mut state = self.state.lock().map_err(|_| HostError::Internal {
            message: "fake spawner state poisoned".to_string(),
        })?;
        if let Some(message) = state.fail_next.take() {
            return Err(HostError::Spawn {
                command: launch.display(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            });
        }

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, terminate_rx) = oneshot::channel();
        state.spawned.push_back(FakeProcess {
            launch: launch.clone(),
            output: Some(output_tx),
            exit: Some(exit_tx),
            terminate: terminate_rx,
        });

        Ok(SpawnedProcess {
            pid: None,
            output: UnboundedReceiverStream::new(output_rx).boxed(),
            exit: exit_rx
                .map(|reason| reason.unwrap_or(ExitReason::Signal(None)))
                .boxed(),
            terminate: TerminateHandle::new(terminate_tx),
        })
    }
}
