//! rumord server - wires the node to its input and output streams

use crate::config::Config;
use crate::node::{BroadcastNode, NodeStats};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumor_net::runtime::{self, Inbound, RuntimeError};
use rumor_net::{JsonLinesCodec, WriterTransport};
use std::future::Future;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Shutdown before init")]
    ShutdownBeforeInit,
}

/// Server state
pub struct Server {
    config: Config,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Run until the input closes or shutdown is requested.
    ///
    /// Returns the node's final statistics.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<NodeStats, ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let (transport, writer) = WriterTransport::spawn(output);
        let mut inbound = Inbound::with_codec(
            input,
            JsonLinesCodec::with_max_line_bytes(self.config.max_line_bytes),
        );

        let (identity, outbox) = tokio::select! {
            init = runtime::await_init(&mut inbound, Arc::new(transport)) => init?,
            _ = shutdown_rx.recv() => return Err(ServerError::ShutdownBeforeInit),
        };
        let node = BroadcastNode::new(&identity, outbox.clone(), &self.config);

        let rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let gossip = node
            .gossip_scheduler(self.config.gossip_interval(), rng)
            .spawn();

        info!(
            "Node {} serving with {} peers (propagation: {:?}, gossip: {:?} every {}ms)",
            node.node_id(),
            node.peers().len(),
            self.config.propagation,
            self.config.gossip_mode,
            self.config.gossip_interval_ms
        );

        let served = tokio::select! {
            result = runtime::serve(&mut inbound, &outbox, &node) => result,
            _ = shutdown_rx.recv() => {
                info!("Shutting down...");
                Ok(())
            }
        };

        gossip.stop().await;
        let stats = node.stats();

        // Dropping the last senders lets the writer drain and exit
        drop(node);
        drop(outbox);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Writer failed: {}", e),
            Err(e) => warn!("Writer task panicked: {}", e),
        }

        served?;
        Ok(stats)
    }

    /// Like [`Server::run`], but shut down once `signal` fires.
    ///
    /// A signal source that fails is logged and otherwise ignored; the node
    /// keeps serving until its input closes.
    pub async fn run_until<R, W, S>(
        &self,
        input: R,
        output: W,
        signal: S,
    ) -> Result<NodeStats, ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = io::Result<()>>,
    {
        let run = self.run(input, output);
        tokio::pin!(run);

        // The run future must subscribe to shutdown before the signal is seen
        tokio::select! {
            biased;
            result = &mut run => result,
            signal = signal => {
                match signal {
                    Ok(()) => {
                        info!("Received shutdown signal");
                        self.shutdown();
                    }
                    Err(e) => warn!("Shutdown signal unavailable: {}", e),
                }
                run.await
            }
        }
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
