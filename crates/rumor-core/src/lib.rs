//! rumor core library
//!
//! This crate provides the wire types and error taxonomy shared by the
//! rumor transport layer and the broadcast daemon.
//!
//! # Modules
//!
//! - [`types`]: Identity and value types (NodeId, Value)
//! - [`message`]: Message envelope, body and typed payloads
//! - [`error`]: Error types and protocol error codes

pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, ErrorCode, MalformedMessage, Result};
pub use message::{Body, Message, MessageKind, Payload};
pub use types::*;
