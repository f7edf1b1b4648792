use thiserror::Error;

use crate::registry::ConnectionId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

/// An inbound frame the hub refuses to act on.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported event type {0:?}")]
    UnsupportedKind(String),
    #[error("field {0} must be a scalar")]
    InvalidField(&'static str),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}
