#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use media_fetch_host::framing::{encode_message, FrameReader, FramingError};
use media_fetch_host::spawner::ProcessSpawner;
use media_fetch_host::{run_host, HostConfig};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const PIPE_CAPACITY: usize = 256 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Plays the browser side of a running host over in-memory pipes.
pub struct BrowserPort {
    input: Option<DuplexStream>,
    output: FrameReader<DuplexStream>,
    host: JoinHandle<Result<(), FramingError>>,
}

impl BrowserPort {
    pub fn spawn(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self::spawn_with(HostConfig::default(), spawner)
    }

    pub fn spawn_with(config: HostConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let (input, host_input) = tokio::io::duplex(PIPE_CAPACITY);
        let (host_output, output) = tokio::io::duplex(PIPE_CAPACITY);
        let host = tokio::spawn(run_host(host_input, host_output, config, spawner));
        Self {
            input: Some(input),
            output: FrameReader::new(output),
            host,
        }
    }

    pub async fn send(&mut self, message: Value) {
        let frame = encode_message(&message).expect("encode frame");
        self.send_raw(&frame).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let input = self.input.as_mut().expect("input already closed");
        input.write_all(bytes).await.expect("write to host");
    }

    /// Sends `message` and returns the next frame, which must be its
    /// response.
    pub async fn request(&mut self, message: Value) -> Value {
        self.send(message).await;
        self.recv().await
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv()
            .await
            .expect("host closed output before replying")
    }

    pub async fn try_recv(&mut self) -> Option<Value> {
        tokio::time::timeout(READ_TIMEOUT, self.output.read_message())
            .await
            .expect("timed out waiting for host frame")
            .expect("host wrote a malformed frame")
    }

    /// Reads frames until the completion event for `key`, returning every
    /// event seen on the way.
    pub async fn events_until_complete(&mut self, key: &str) -> Vec<Value> {
        let mut events = Vec::new();
        loop {
            let frame = self.recv().await;
            let done = frame["type"] == "complete" && frame["key"] == key;
            events.push(frame);
            if done {
                return events;
            }
        }
    }

    pub fn close_input(&mut self) {
        self.input.take();
    }

    /// Closes the input and waits for the host to exit.
    pub async fn finish(mut self) -> (Result<(), FramingError>, Vec<Value>) {
        self.close_input();
        let mut trailing = Vec::new();
        while let Some(frame) = self.try_recv().await {
            trailing.push(frame);
        }
        let result = tokio::time::timeout(READ_TIMEOUT, self.host)
            .await
            .expect("host did not exit")
            .expect("host task panicked");
        (result, trailing)
    }
}
