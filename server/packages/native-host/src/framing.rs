//! Length-prefixed framing for the native-messaging stdio channel.
//!
//! Every frame is a 4-byte little-endian `u32` length followed by that many
//! bytes of UTF-8 JSON. The same layout is used in both directions.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Browsers reject host-to-extension messages above 1 MiB.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("truncated frame header ({read} of 4 bytes)")]
    TruncatedHeader { read: usize },
    #[error("truncated frame body ({read} of {expected} bytes)")]
    TruncatedBody { read: usize, expected: usize },
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
    #[error("frame is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("frame is not valid json: {0}")]
    InvalidJson(serde_json::Error),
    #[error("failed to serialize frame: {0}")]
    Serialize(serde_json::Error),
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Prefix `body` with its length.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, FramingError> {
    let len = u32::try_from(body.len()).map_err(|_| FramingError::TooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

pub fn encode_message<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, FramingError> {
    let body = serde_json::to_vec(message).map_err(FramingError::Serialize)?;
    encode_frame(&body)
}

/// Decode exactly one complete frame held in memory.
pub fn decode_message(frame: &[u8]) -> Result<Value, FramingError> {
    if frame.len() < HEADER_LEN {
        return Err(FramingError::TruncatedHeader { read: frame.len() });
    }
    let (header, body) = frame.split_at(HEADER_LEN);
    let expected = frame_len(header);
    if body.len() < expected {
        return Err(FramingError::TruncatedBody {
            read: body.len(),
            expected,
        });
    }
    parse_body(&body[..expected])
}

fn frame_len(header: &[u8]) -> usize {
    let mut bytes = [0u8; HEADER_LEN];
    bytes.copy_from_slice(&header[..HEADER_LEN]);
    u32::from_le_bytes(bytes) as usize
}

fn parse_body(body: &[u8]) -> Result<Value, FramingError> {
    let text = std::str::from_utf8(body)?;
    serde_json::from_str(text).map_err(FramingError::InvalidJson)
}

#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_INBOUND_FRAME)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            max_frame_bytes,
        }
    }

    /// Reads the next frame body. `Ok(None)` means the peer closed the
    /// stream cleanly on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let read = self.inner.read(&mut header[filled..]).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FramingError::TruncatedHeader { read: filled });
            }
            filled += read;
        }

        let expected = frame_len(&header);
        if expected > self.max_frame_bytes {
            return Err(FramingError::TooLarge {
                len: expected,
                max: self.max_frame_bytes,
            });
        }

        let mut body = Vec::with_capacity(expected);
        (&mut self.inner)
            .take(expected as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() < expected {
            return Err(FramingError::TruncatedBody {
                read: body.len(),
                expected,
            });
        }
        Ok(Some(body))
    }

    pub async fn read_message(&mut self) -> Result<Option<Value>, FramingError> {
        match self.read_frame().await? {
            Some(body) => parse_body(&body).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_frame_bytes: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            max_frame_bytes: MAX_OUTBOUND_FRAME,
        }
    }

    /// Writes prefix and body with a single `write_all` so a frame is never
    /// split across writers.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), FramingError> {
        if body.len() > self.max_frame_bytes {
            return Err(FramingError::TooLarge {
                len: body.len(),
                max: self.max_frame_bytes,
            });
        }
        let frame = encode_frame(body)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), FramingError> {
        let body = serde_json::to_vec(message).map_err(FramingError::Serialize)?;
        self.write_frame(&body).await
    }
}
