//! Error taxonomy (§7): connection-fatal errors, stream-fatal errors, and
//! the public error type the crate's async operations resolve with.

use crate::types::{ErrorType, StreamId};

/// Fatal to the whole connection. Carries the wire error code a GOAWAY
/// should report and enough detail for the debug-data field.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("frame size error: {0}")]
    FrameSize(String),
    #[error("flow control error: {0}")]
    FlowControl(String),
    #[error("HPACK compression error: {0}")]
    Compression(String),
    #[error("peer did not ACK SETTINGS in time")]
    SettingsTimeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ConnectionError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn wire_code(&self) -> ErrorType {
        match self {
            Self::Protocol(_) => ErrorType::ProtocolError,
            Self::FrameSize(_) => ErrorType::FrameSizeError,
            Self::FlowControl(_) => ErrorType::FlowControlError,
            Self::Compression(_) => ErrorType::CompressionError,
            Self::SettingsTimeout => ErrorType::SettingsTimeout,
            Self::Internal(_) => ErrorType::InternalError,
        }
    }
}

/// Fatal to a single stream; other streams on the connection continue (§7).
#[derive(thiserror::Error, Debug, Clone)]
pub enum StreamError {
    #[error("stream {0} protocol violation: {1}")]
    ProtocolViolation(StreamId, String),
    #[error("stream {0} cancelled by peer")]
    Cancelled(StreamId),
    #[error("stream {0} refused")]
    Refused(StreamId),
    #[error("stream {0} closed")]
    Closed(StreamId),
}

impl StreamError {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::ProtocolViolation(id, _)
            | Self::Cancelled(id)
            | Self::Refused(id)
            | Self::Closed(id) => *id,
        }
    }

    pub fn wire_code(&self) -> ErrorType {
        match self {
            Self::ProtocolViolation(..) => ErrorType::ProtocolError,
            Self::Cancelled(_) => ErrorType::Cancel,
            Self::Refused(_) => ErrorType::RefusedStream,
            Self::Closed(_) => ErrorType::StreamClosed,
        }
    }
}

/// The crate's public error type: what `Connection`, `Stream`, `Request`,
/// and `Response` operations resolve with.
#[derive(thiserror::Error, Debug)]
pub enum Http2Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
}
