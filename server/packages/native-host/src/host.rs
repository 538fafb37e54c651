//! The request loop: read a frame, dispatch it, queue the response, repeat.

use std::sync::Arc;

use media_fetch_host_error::HostError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::HostConfig;
use crate::dispatcher::Dispatcher;
use crate::framing::{FrameReader, FrameWriter, FramingError};
use crate::protocol::{HostEvent, Outbound, Response};
use crate::spawner::ProcessSpawner;
use crate::supervisor::Supervisor;

/// Serves requests from `input` until it reaches EOF or carries a corrupt
/// frame. Requests are handled one at a time; download events are
/// interleaved with responses by a single writer task that owns `output`.
pub async fn run_host<R, W>(
    input: R,
    output: W,
    config: HostConfig,
    spawner: Arc<dyn ProcessSpawner>,
) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (responses_tx, responses_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(
        FrameWriter::new(output),
        responses_rx,
        events_rx,
    ));

    let mut reader = FrameReader::with_limit(input, config.max_frame_bytes);
    let dispatcher = Dispatcher::new(config, Supervisor::new(spawner, events_tx));
    tracing::info!("native host ready");

    let mut seq: u64 = 0;
    let result = loop {
        match reader.read_message().await {
            Ok(Some(message)) => {
                seq += 1;
                let response = dispatcher
                    .dispatch(message)
                    .instrument(tracing::info_span!("message", seq))
                    .await;
                if responses_tx.send(response).is_err() {
                    tracing::warn!("output channel closed; stopping");
                    break Ok(());
                }
            }
            Ok(None) => {
                tracing::info!(messages = seq, "input closed; shutting down");
                break Ok(());
            }
            Err(err) => {
                tracing::error!(error = %err, "framing error; shutting down");
                let _ = responses_tx.send(Response::fatal(&err));
                break Err(err);
            }
        }
    };

    dispatcher.supervisor().shutdown().await;
    drop(responses_tx);
    let written = match writer.await {
        Ok(written) => written,
        Err(err) => {
            tracing::error!(error = %err, "writer task failed");
            Ok(())
        }
    };

    match (result, written) {
        (Err(err), _) => Err(err),
        (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Writes queued responses and events until the response channel closes,
/// then flushes whatever events are already queued. Responses win when both
/// are ready.
async fn write_outbound<W>(
    mut writer: FrameWriter<W>,
    mut responses: mpsc::UnboundedReceiver<Response>,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut events_open = true;
    loop {
        let outbound = tokio::select! {
            biased;
            response = responses.recv() => match response {
                Some(response) => Outbound::Response(response),
                None => break,
            },
            event = events.recv(), if events_open => match event {
                Some(event) => Outbound::Event(event),
                None => {
                    events_open = false;
                    continue;
                }
            },
        };
        write_one(&mut writer, outbound).await?;
    }

    while let Ok(event) = events.try_recv() {
        write_one(&mut writer, Outbound::Event(event)).await?;
    }
    Ok(())
}

async fn write_one<W>(writer: &mut FrameWriter<W>, outbound: Outbound) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    match writer.write_message(&outbound).await {
        Ok(()) => Ok(()),
        Err(FramingError::TooLarge { len, max }) => match outbound {
            Outbound::Response(response) => {
                tracing::warn!(len, max, kind = ?response.kind, "response too large; replacing");
                let replacement = Response::failure(
                    response.kind,
                    &HostError::Internal {
                        message: format!("response of {len} bytes exceeds the {max} byte limit"),
                    },
                );
                writer.write_message(&Outbound::Response(replacement)).await
            }
            Outbound::Event(event) => {
                tracing::warn!(len, max, key = %event.key(), "event too large; dropped");
                Ok(())
            }
        },
        Err(FramingError::Serialize(err)) => {
            tracing::warn!(error = %err, "failed to serialize outbound message; dropped");
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to write frame");
            Err(err)
        }
    }
}
