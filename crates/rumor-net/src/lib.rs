//! rumor-net: Message transport for rumor nodes
//!
//! - Line-delimited JSON framing
//! - Transport abstraction (stdio writer, in-memory network)
//! - Outbox with msg_id assignment and reply correlation
//! - Node runtime: init handshake and handler dispatch

pub mod framing;
pub mod memory;
pub mod runtime;
pub mod transport;

pub use framing::{FrameError, JsonLinesCodec};
pub use memory::MemoryNetwork;
pub use runtime::{Handler, HandlerError, Identity, Inbound, Outbox, RuntimeError};
pub use transport::{Transport, TransportError, WriterTransport};
