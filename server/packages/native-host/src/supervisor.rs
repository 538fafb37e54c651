//! Download supervisor: one child process per active download key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use media_fetch_host_error::HostError;
use tokio::sync::{mpsc, Mutex};

use crate::parser::{normalize_chunk, OutputParser};
use crate::protocol::HostEvent;
use crate::spawner::{ExitReason, LaunchSpec, OutputChunk, ProcessSpawner, TerminateHandle};

/// Output still buffered when the child exits is read for this long before
/// the completion event goes out.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

pub type EventSink = mpsc::UnboundedSender<HostEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub key: String,
    pub launch: LaunchSpec,
    /// Where the tool was told to write; reported on success.
    pub filepath: String,
}

/// Terminal classification of a download child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Cancelled,
    Failed(i32),
}

impl From<ExitReason> for ExitOutcome {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::Code(0) => Self::Success,
            ExitReason::Code(code) => Self::Failed(code),
            ExitReason::Signal(_) => Self::Cancelled,
        }
    }
}

impl ExitOutcome {
    pub fn into_event(self, key: &str, filepath: &str) -> HostEvent {
        let (success, filepath, error) = match self {
            Self::Success => (true, Some(filepath.to_string()), None),
            Self::Cancelled => (false, None, Some("cancelled".to_string())),
            Self::Failed(code) => (false, None, Some(format!("download failed (code={code})"))),
        };
        HostEvent::Complete {
            key: key.to_string(),
            success,
            filepath,
            error,
        }
    }
}

#[derive(Debug)]
struct ActiveDownload {
    generation: u64,
    pid: Option<u32>,
    terminate: TerminateHandle,
    started_at: Instant,
}

struct SupervisorInner {
    spawner: Arc<dyn ProcessSpawner>,
    registry: Mutex<HashMap<String, ActiveDownload>>,
    events: EventSink,
    parser: &'static OutputParser,
    next_generation: AtomicU64,
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, events: EventSink) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                spawner,
                registry: Mutex::new(HashMap::new()),
                events,
                parser: OutputParser::shared(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Spawns the download child and returns as soon as it is registered.
    /// Completion is reported later through the event sink.
    pub async fn start(&self, request: DownloadRequest) -> Result<(), HostError> {
        let DownloadRequest {
            key,
            launch,
            filepath,
        } = request;

        let mut registry = self.inner.registry.lock().await;
        if registry.contains_key(&key) {
            tracing::warn!(key = %key, "download already active");
            return Err(HostError::Conflict { key });
        }

        tracing::info!(key = %key, command = %launch.display(), "spawning download");
        let spawned = self.inner.spawner.spawn(&launch)?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        registry.insert(
            key.clone(),
            ActiveDownload {
                generation,
                pid: spawned.pid,
                terminate: spawned.terminate,
                started_at: Instant::now(),
            },
        );
        tracing::info!(
            key = %key,
            pid = ?spawned.pid,
            active = registry.len(),
            "download started"
        );
        drop(registry);

        tokio::spawn(supervise(
            self.inner.clone(),
            key,
            generation,
            filepath,
            spawned.output,
            spawned.exit,
        ));
        Ok(())
    }

    /// Asks the child to stop and forgets it. The exit event that follows is
    /// the real end of the download.
    pub async fn cancel(&self, key: &str) -> Result<(), HostError> {
        let entry = self.inner.registry.lock().await.remove(key);
        let Some(entry) = entry else {
            tracing::info!(key = %key, "cancel: no active download");
            return Err(HostError::NotFound {
                key: key.to_string(),
            });
        };

        let delivered = entry.terminate.terminate();
        tracing::info!(
            key = %key,
            pid = ?entry.pid,
            delivered,
            age_ms = entry.started_at.elapsed().as_millis() as u64,
            "cancel: termination requested"
        );
        Ok(())
    }

    pub async fn is_active(&self, key: &str) -> bool {
        self.inner.registry.lock().await.contains_key(key)
    }

    pub async fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.registry.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Terminates every active child. Used when the host is going away.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, ActiveDownload)> =
            self.inner.registry.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "terminating active downloads");
        for (key, entry) in drained {
            let delivered = entry.terminate.terminate();
            tracing::debug!(key = %key, pid = ?entry.pid, delivered, "shutdown: termination requested");
        }
    }
}

impl SupervisorInner {
    fn handle_output(&self, key: &str, chunk: OutputChunk) {
        let text = normalize_chunk(&chunk.text);
        if text.is_empty() {
            return;
        }
        tracing::debug!(key = %key, stream = chunk.stream.as_str(), output = %text, "download output");

        if let Some(percent) = self.parser.progress_percent(&text) {
            let _ = self.events.send(HostEvent::Progress {
                key: key.to_string(),
                percent,
                output: text,
            });
        }
    }

    /// Drops the registry entry for a child that has exited, unless a newer
    /// download with the same key has taken its place.
    async fn release(&self, key: &str, generation: u64) -> Option<u64> {
        let mut registry = self.registry.lock().await;
        match registry.get(key) {
            Some(entry) if entry.generation == generation => registry
                .remove(key)
                .map(|entry| entry.started_at.elapsed().as_millis() as u64),
            _ => None,
        }
    }

    fn report(&self, key: &str, filepath: &str, reason: ExitReason, age_ms: Option<u64>) {
        let outcome = ExitOutcome::from(reason);
        tracing::info!(
            key = %key,
            reason = ?reason,
            outcome = ?outcome,
            age_ms = ?age_ms,
            "download process exited"
        );
        let _ = self.events.send(outcome.into_event(key, filepath));
    }
}

async fn supervise(
    inner: Arc<SupervisorInner>,
    key: String,
    generation: u64,
    filepath: String,
    mut output: BoxStream<'static, OutputChunk>,
    mut exit: BoxFuture<'static, ExitReason>,
) {
    let mut output_open = true;
    let reason = loop {
        tokio::select! {
            biased;
            chunk = output.next(), if output_open => match chunk {
                Some(chunk) => inner.handle_output(&key, chunk),
                None => output_open = false,
            },
            reason = &mut exit => break reason,
        }
    };

    // The key is free as soon as the child is gone; late output only delays
    // the completion event.
    let age_ms = inner.release(&key, generation).await;

    if output_open {
        let drain = async {
            while let Some(chunk) = output.next().await {
                inner.handle_output(&key, chunk);
            }
        };
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, drain).await.is_err() {
            tracing::debug!(key = %key, "output still open after exit; not waiting further");
        }
    }

    inner.report(&key, &filepath, reason, age_ms);
}
