//! Error types for rumor

use crate::message::MessageKind;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// rumor error types
#[derive(Debug, Error)]
pub enum Error {
    /// The line is not a JSON message envelope
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope parsed but the body did not match its declared type
    #[error("{0}")]
    Malformed(MalformedMessage),

    /// The message type is valid but this node does not serve it
    #[error("message type not supported: {0}")]
    NotSupported(MessageKind),

    /// A protocol error code outside the known registry
    #[error("unknown error code: {0}")]
    UnknownErrorCode(u32),
}

impl Error {
    /// Protocol error code reported back to the requester
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Json(_) | Error::Malformed(_) => ErrorCode::MalformedRequest,
            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::UnknownErrorCode(_) => ErrorCode::Crash,
        }
    }
}

/// Context kept from an envelope whose body failed to decode
#[derive(Debug, Clone)]
pub struct MalformedMessage {
    pub src: NodeId,
    pub dest: NodeId,
    /// Raw `type` field, if one was present
    pub msg_type: Option<String>,
    pub msg_id: Option<u64>,
    pub reason: String,
}

impl MalformedMessage {
    /// Declared kind, if the `type` field names a known message
    pub fn kind(&self) -> Option<MessageKind> {
        self.msg_type.as_deref().and_then(|t| t.parse().ok())
    }

    /// Error reply owed to the sender, if any.
    ///
    /// Only requests with a `msg_id` can be answered. Peer-to-peer kinds are
    /// never answered; the same values will arrive again through gossip.
    pub fn reply_code(&self) -> Option<ErrorCode> {
        self.msg_id?;
        match self.kind() {
            Some(kind) if kind.is_client_facing() => Some(ErrorCode::MalformedRequest),
            Some(_) => None,
            None if self.msg_type.is_some() => Some(ErrorCode::NotSupported),
            None => Some(ErrorCode::MalformedRequest),
        }
    }
}

impl fmt::Display for MalformedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed {} message from {}: {}",
            self.msg_type.as_deref().unwrap_or("untyped"),
            self.src,
            self.reason
        )
    }
}

/// Maelstrom protocol error codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ErrorCode {
    /// The requested operation timed out
    Timeout = 0,
    /// The destination node does not exist
    NodeNotFound = 1,
    /// The request type is not supported by this node
    NotSupported = 10,
    /// The operation could not be served right now
    TemporarilyUnavailable = 11,
    /// The request body did not decode
    MalformedRequest = 12,
    /// The node hit an internal failure
    Crash = 13,
    /// The operation was aborted
    Abort = 14,
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code as u32
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = Error;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Timeout),
            1 => Ok(Self::NodeNotFound),
            10 => Ok(Self::NotSupported),
            11 => Ok(Self::TemporarilyUnavailable),
            12 => Ok(Self::MalformedRequest),
            13 => Ok(Self::Crash),
            14 => Ok(Self::Abort),
            _ => Err(Error::UnknownErrorCode(value)),
        }
    }
}
