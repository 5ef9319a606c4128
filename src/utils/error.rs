//! Error types for the Strix engine core

use thiserror::Error;

/// Main error type for Strix operations
#[derive(Debug, Error)]
pub enum StrixError {
    /// IPC channel errors
    #[error("ipc: {0}")]
    Ipc(#[from] IpcError),
    /// Wire payload decode errors
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    /// Child process launch errors
    #[error("launch: {0}")]
    Launch(#[from] LaunchError),
    /// URL rejected before any message was sent
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// I/O errors
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Channel-level errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// The channel has been invalidated or the peer is gone
    #[error("channel is no longer valid")]
    ChannelInvalid,
    /// Transport-level failure while opening or framing
    #[error("transport: {0}")]
    Transport(String),
}

/// Failure decoding a wire payload against its expected argument shape
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Ran off the end of the payload
    #[error("payload exhausted: wanted {wanted} bytes, {remaining} remaining")]
    UnexpectedEof { wanted: usize, remaining: usize },
    /// String field was not valid UTF-8
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    /// A tag or enum discriminant had no meaning
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
}

/// Child process launch failures
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch failed: {0}")]
    Failed(String),
}

/// Convenience Result type for Strix operations
pub type Result<T> = std::result::Result<T, StrixError>;
