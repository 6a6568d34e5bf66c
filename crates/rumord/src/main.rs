//! rumord - rumor broadcast node
//!
//! Speaks the line-delimited JSON protocol on stdin/stdout. Values broadcast
//! at any node are flooded once to its peers and repaired by periodic
//! anti-entropy gossip. Logs go to stderr.

use clap::Parser;
use rumord::config::Config;
use rumord::server::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let default_level = if config.verbose { "rumord=debug" } else { "rumord=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    init_logging(&config);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("rumord v{} - rumor Broadcast Node", env!("CARGO_PKG_VERSION"));

    let server = Server::new(config);
    let result = server
        .run_until(tokio::io::stdin(), tokio::io::stdout(), tokio::signal::ctrl_c())
        .await;

    match result {
        Ok(stats) => {
            info!(
                "Final stats: {} values, {} broadcasts, {} forwards sent, {} gossip rounds, {} merged, {} send failures",
                stats.values,
                stats.broadcasts,
                stats.forwards_sent,
                stats.gossip_rounds,
                stats.values_merged,
                stats.send_failures
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
