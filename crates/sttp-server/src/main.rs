//! STTP publisher binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with a self-signed certificate (development)
//! sttp-publisher --bind 0.0.0.0:6165 --self-signed
//!
//! # Start with a TLS certificate (production)
//! sttp-publisher --bind 0.0.0.0:6165 --cert cert.pem --key key.pem
//! ```

use std::time::Duration;

use clap::Parser;
use sttp_server::{Server, ServerRuntimeConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// STTP publisher runtime
#[derive(Parser, Debug)]
#[command(name = "sttp-publisher")]
#[command(about = "Streaming Telemetry Transport Protocol publisher")]
#[command(version)]
struct Args {
    /// Address to bind the command channel to
    #[arg(short, long, default_value = "0.0.0.0:6165")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Generate a self-signed certificate when no cert/key is given
    #[arg(long)]
    self_signed: bool,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1000")]
    max_connections: usize,

    /// Seconds between periodic cipher-key rotations
    #[arg(long, default_value = "60")]
    cipher_rotation_secs: u64,

    /// Seconds between buffer-block retransmit sweeps
    #[arg(long, default_value = "5")]
    buffer_block_retransmit_secs: u64,

    /// Publish synthetic demo signals instead of waiting on a real feed
    #[arg(long)]
    demo: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("STTP publisher starting");

    if args.cert.is_none() && args.key.is_none() && !args.self_signed {
        tracing::warn!("no TLS certificate or --self-signed given - command channel is plaintext");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        generate_self_signed: args.self_signed,
        max_connections: args.max_connections,
        cipher_rotation: Duration::from_secs(args.cipher_rotation_secs),
        buffer_block_retransmit: Duration::from_secs(args.buffer_block_retransmit_secs),
    };

    let server = Server::bind(config).await?;
    tracing::info!(addr = %server.local_addr()?, "publisher listening");

    if args.demo {
        let store = server.metadata_store();
        let signal_ids = sttp_server::demo_source::register_demo_signals(&store);
        let tx = server.measurement_sender();
        tokio::spawn(sttp_server::demo_source::run(tx, store, signal_ids, Duration::from_secs(1)));
    }

    server.run().await?;

    Ok(())
}
