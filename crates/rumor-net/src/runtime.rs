//! Node runtime: init handshake, reply correlation and handler dispatch

use crate::framing::{FrameError, JsonLinesCodec};
use crate::transport::{Transport, TransportError};
use bytes::BytesMut;
use rumor_core::{ErrorCode, MalformedMessage, Message, NodeId, Payload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Decode error: {0}")]
    Decode(#[from] rumor_core::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Input closed before init")]
    NotInitialized,
}

impl RuntimeError {
    /// Whether the inbound loop has to stop
    pub fn is_fatal(&self) -> bool {
        match self {
            RuntimeError::Frame(e) => !e.is_recoverable(),
            RuntimeError::Decode(_) | RuntimeError::Transport(_) => false,
            RuntimeError::NotInitialized => true,
        }
    }
}

/// Errors a handler reports back to the runtime
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request is refused; the requester gets an `error` reply
    #[error(transparent)]
    Rejected(#[from] rumor_core::Error),
    /// The handler could not send its reply
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Message handler for everything after `init`
pub trait Handler: Send + Sync {
    fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Identity assigned by the `init` message
#[derive(Debug, Clone)]
pub struct Identity {
    pub node_id: NodeId,
    /// Every node in the cluster, including this one
    pub node_ids: Vec<NodeId>,
}

// =============================================================================
// OUTBOX
// =============================================================================

/// Per-node sender stamping `src` and `msg_id`
#[derive(Clone)]
pub struct Outbox {
    node_id: NodeId,
    next_msg_id: Arc<AtomicU64>,
    transport: Arc<dyn Transport>,
}

impl Outbox {
    pub fn new(node_id: NodeId, transport: Arc<dyn Transport>) -> Self {
        Self {
            node_id,
            next_msg_id: Arc::new(AtomicU64::new(0)),
            transport,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fire-and-forget send; returns the assigned `msg_id`
    pub fn send(&self, dest: &NodeId, payload: Payload) -> Result<u64, TransportError> {
        let msg_id = self.next_msg_id();
        let mut message = Message::new(self.node_id.clone(), dest.clone(), payload);
        message.body.msg_id = Some(msg_id);
        self.transport.send(message)?;
        Ok(msg_id)
    }

    /// Answer `request`, correlating through its `msg_id`
    pub fn reply(&self, request: &Message, payload: Payload) -> Result<(), TransportError> {
        self.reply_to(&request.src, request.body.msg_id, payload)
    }

    fn reply_to(
        &self,
        dest: &NodeId,
        in_reply_to: Option<u64>,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let mut message = Message::new(self.node_id.clone(), dest.clone(), payload);
        message.body.msg_id = Some(self.next_msg_id());
        message.body.in_reply_to = in_reply_to;
        self.transport.send(message)
    }

    fn reject(&self, dest: &NodeId, in_reply_to: u64, code: ErrorCode, text: String) {
        if let Err(e) = self.reply_to(dest, Some(in_reply_to), Payload::Error { code, text }) {
            warn!("Error reply to {} failed: {}", dest, e);
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Inbound message stream over a byte reader (stdin in production)
pub struct Inbound<R> {
    reader: R,
    codec: JsonLinesCodec,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Inbound<R> {
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, JsonLinesCodec::new())
    }

    pub fn with_codec(reader: R, codec: JsonLinesCodec) -> Self {
        Self {
            reader,
            codec,
            buf: BytesMut::with_capacity(8192),
            eof: false,
        }
    }

    /// Next message; `None` once the input is exhausted
    pub async fn recv(&mut self) -> Option<Result<Message, RuntimeError>> {
        match self.next_line().await {
            Ok(Some(line)) => Some(Message::decode(&line).map_err(RuntimeError::from)),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            if let Some(line) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(line));
            }
            if self.eof {
                return self.codec.decode_eof(&mut self.buf);
            }
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Wait for `init`, answer it and return the assigned identity.
///
/// Requests arriving before `init` are refused as temporarily unavailable.
pub async fn await_init<R: AsyncRead + Unpin>(
    inbound: &mut Inbound<R>,
    transport: Arc<dyn Transport>,
) -> Result<(Identity, Outbox), RuntimeError> {
    while let Some(next) = inbound.recv().await {
        let message = match next {
            Ok(message) => message,
            Err(RuntimeError::Decode(rumor_core::Error::Malformed(m))) => {
                reject_malformed(&Outbox::new(m.dest.clone(), transport.clone()), &m);
                continue;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Dropping inbound line: {}", e);
                continue;
            }
        };

        if let Payload::Init { node_id, node_ids } = message.payload() {
            let identity = Identity {
                node_id: node_id.clone(),
                node_ids: node_ids.clone(),
            };
            let outbox = Outbox::new(identity.node_id.clone(), transport);
            outbox.reply(&message, Payload::InitOk)?;
            info!(
                "Initialized as {} ({} nodes in cluster)",
                identity.node_id,
                identity.node_ids.len()
            );
            return Ok((identity, outbox));
        }

        warn!("Received {} from {} before init", message.kind(), message.src);
        if let Some(msg_id) = message.body.msg_id {
            if !message.kind().is_peer_to_peer() {
                Outbox::new(message.dest.clone(), transport.clone()).reject(
                    &message.src,
                    msg_id,
                    ErrorCode::TemporarilyUnavailable,
                    "node not initialized".to_string(),
                );
            }
        }
    }

    Err(RuntimeError::NotInitialized)
}

/// Dispatch inbound messages to `handler` until the input closes
pub async fn serve<R, H>(
    inbound: &mut Inbound<R>,
    outbox: &Outbox,
    handler: &H,
) -> Result<(), RuntimeError>
where
    R: AsyncRead + Unpin,
    H: Handler + ?Sized,
{
    while let Some(next) = inbound.recv().await {
        match next {
            Ok(message) => dispatch(message, outbox, handler),
            Err(RuntimeError::Decode(rumor_core::Error::Malformed(m))) => {
                reject_malformed(outbox, &m)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Dropping inbound line: {}", e),
        }
    }

    debug!("Input closed");
    Ok(())
}

fn dispatch<H: Handler + ?Sized>(message: Message, outbox: &Outbox, handler: &H) {
    if let Payload::Init { .. } = message.payload() {
        debug!("Repeated init from {}", message.src);
        if let Err(e) = outbox.reply(&message, Payload::InitOk) {
            warn!("init_ok to {} failed: {}", message.src, e);
        }
        return;
    }

    let kind = message.kind();
    let src = message.src.clone();
    let msg_id = message.body.msg_id;

    match handler.handle(message) {
        Ok(()) => {}
        Err(HandlerError::Rejected(err)) => {
            warn!("Rejected {} from {}: {}", kind, src, err);
            if let (Some(msg_id), false) = (msg_id, kind.is_peer_to_peer()) {
                outbox.reject(&src, msg_id, err.code(), err.to_string());
            }
        }
        Err(HandlerError::Transport(e)) => {
            warn!("Handling {} from {} failed to send: {}", kind, src, e);
        }
    }
}

fn reject_malformed(outbox: &Outbox, malformed: &MalformedMessage) {
    warn!("{}", malformed);
    if let (Some(code), Some(msg_id)) = (malformed.reply_code(), malformed.msg_id) {
        outbox.reject(&malformed.src, msg_id, code, malformed.to_string());
    }
}
