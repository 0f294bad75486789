//! Error types for the RetroTouch runtime core.
//!
//! Errors fall into four groups that are handled very differently by the
//! supervisor and the runner:
//!
//! - **Framing** (`PeerLost`, `FrameTooLarge`): the byte stream can no longer be
//!   trusted. Treated as loss of the peer process and never retried.
//! - **Dispatch** (`Dispatch`): one call could not be mapped or executed. Logged
//!   and swallowed; the channel keeps going.
//! - **Engine** (`Engine`): fatal while loading a core or game, merely reported
//!   for save/screenshot operations.
//! - **Region** (`RegionOverflow`, `InvalidSlot`): logic defects in the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the runtime core.
#[derive(Debug, Error)]
pub enum RetroError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Channel errors
    #[error("Peer process lost: {reason}")]
    PeerLost { reason: String },

    #[error("RPC frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Cannot dispatch {method}: {message}")]
    Dispatch { method: String, message: String },

    // Region errors
    #[error("Image slot {index} out of range (max {max})")]
    InvalidSlot { index: usize, max: usize },

    #[error("Region write of {len} bytes at offset {offset} exceeds region size {region_size}")]
    RegionOverflow {
        offset: usize,
        len: usize,
        region_size: usize,
    },

    // Engine errors
    #[error("Engine {operation} failed: {message}")]
    Engine { operation: String, message: String },

    // Session errors
    #[error("Failed to launch runner {path:?}: {message}")]
    Launch { path: PathBuf, message: String },

    #[error("Invalid environment variable {name}: {message}")]
    InvalidEnv { name: String, message: String },

    #[error("Session is not running")]
    SessionClosed,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for runtime core operations.
pub type Result<T> = std::result::Result<T, RetroError>;

impl From<std::io::Error> for RetroError {
    fn from(err: std::io::Error) -> Self {
        RetroError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RetroError {
    fn from(err: serde_json::Error) -> Self {
        RetroError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RetroError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RetroError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an engine error for the named operation.
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RetroError::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch error for the named method.
    pub fn dispatch(method: impl Into<String>, message: impl Into<String>) -> Self {
        RetroError::Dispatch {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the byte stream to the peer is unusable.
    ///
    /// The supervisor turns these into a crash; the runner into shutdown.
    pub fn is_peer_loss(&self) -> bool {
        matches!(
            self,
            RetroError::PeerLost { .. } | RetroError::FrameTooLarge { .. }
        )
    }
}
