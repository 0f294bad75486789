//! Shared RPC wire format and framing.
//!
//! Every call travels as a 4-byte little-endian length prefix followed by a
//! UTF-8 JSON payload describing the `(method, args, kwargs)` triple.
//!
//! ```text
//! [u32 LE: len][{"method": ..., "args": [...], "kwargs": {...}} of len bytes]
//! ```
//!
//! There are no separators, acknowledgements or versioning. Any failure while
//! reading the prefix or the payload (EOF, I/O error, oversized length, payload
//! that is not a call envelope) means the stream can no longer be trusted and is
//! reported as [`RetroError::PeerLost`] or [`RetroError::FrameTooLarge`].

use crate::config::ChannelConfig;
use crate::{Result, RetroError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt};

/// One RPC call as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RpcCall {
    /// Create a call with no arguments.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Fetch an argument by keyword name, falling back to its position.
    ///
    /// Missing or mistyped arguments are dispatch errors; the frame carrying
    /// them has already been consumed so the channel stays usable.
    pub fn param<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T> {
        let value = self
            .kwargs
            .get(name)
            .or_else(|| self.args.get(index))
            .ok_or_else(|| {
                RetroError::dispatch(&self.method, format!("missing argument '{}'", name))
            })?;

        serde_json::from_value(value.clone()).map_err(|e| {
            RetroError::dispatch(&self.method, format!("invalid argument '{}': {}", name, e))
        })
    }
}

/// Serialize a call into a frame payload.
pub fn encode_call(call: &RpcCall) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(call)?;
    if payload.len() > ChannelConfig::MAX_FRAME_SIZE {
        return Err(RetroError::FrameTooLarge {
            size: payload.len(),
            max: ChannelConfig::MAX_FRAME_SIZE,
        });
    }
    Ok(payload)
}

/// Deserialize a frame payload into a call.
///
/// A payload that is not a call envelope means the stream is garbled.
pub fn decode_call(payload: &[u8]) -> Result<RpcCall> {
    serde_json::from_slice(payload).map_err(|e| RetroError::PeerLost {
        reason: format!("garbled RPC payload: {}", e),
    })
}

fn decode_length(prefix: [u8; 4]) -> Result<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > ChannelConfig::MAX_FRAME_SIZE {
        return Err(RetroError::FrameTooLarge {
            size: len,
            max: ChannelConfig::MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

fn lost(stage: &str, err: std::io::Error) -> RetroError {
    RetroError::PeerLost {
        reason: format!("reading {}: {}", stage, err),
    }
}

/// Read one length-prefixed frame from a blocking reader.
///
/// Frame format: `[4-byte LE u32 length][payload bytes]`
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| lost("length prefix", e))?;

    let len = decode_length(len_buf)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| lost("payload", e))?;

    Ok(payload)
}

/// Read one length-prefixed frame from an async reader.
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| lost("length prefix", e))?;

    let len = decode_length(len_buf)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| lost("payload", e))?;

    Ok(payload)
}

/// Write one length-prefixed frame and flush.
///
/// Prefix and payload go out in a single buffer so a reader never observes a
/// prefix without the start of its payload because of our own write split.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| RetroError::FrameTooLarge {
        size: payload.len(),
        max: ChannelConfig::MAX_FRAME_SIZE,
    })?;

    let mut frame = Vec::with_capacity(ChannelConfig::LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).map_err(|e| RetroError::PeerLost {
        reason: format!("writing frame: {}", e),
    })?;
    writer.flush().map_err(|e| RetroError::PeerLost {
        reason: format!("flushing frame: {}", e),
    })?;
    Ok(())
}

/// Blocking writer half of a channel.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize and send one call.
    pub fn send_call(&mut self, call: &RpcCall) -> Result<()> {
        let payload = encode_call(call)?;
        write_frame(&mut self.inner, &payload)
    }

    /// Send a typed message.
    pub fn send<M: super::Message>(&mut self, message: &M) -> Result<()> {
        self.send_call(&message.to_call())
    }
}
