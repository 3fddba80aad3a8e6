//! Error types for the chat relay
//!
//! Defines application-level errors, outbound send errors and
//! offline-store errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Application-level errors
///
/// Transport failures are fatal for the connection they occur on; the
/// handler treats them as a departure of the peer.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error: over-long line, invalid UTF-8 or IO underneath
    #[error("Framing error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Channel send error (fatal - writer task is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Message send errors
///
/// Occurs when a line cannot be handed to a connection's writer task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task has exited and dropped its receiver
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer is not draining its outbound queue
    #[error("Outbound queue full")]
    QueueFull,
}

/// Offline queue persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading, writing or renaming the queue document failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The queue document is not valid JSON of the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
