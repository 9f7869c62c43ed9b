//! STTP subscriber binary.
//!
//! # Usage
//!
//! ```bash
//! sttp-subscriber --connect 127.0.0.1:6165 --input-measurement-keys DEV1:1,DEV1:2
//! ```

use clap::Parser;
use sttp_client::driver::{self, SubscriberConfig};
use sttp_core::{OperationalModes, ReconnectPolicy};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Operational-modes base value: version 1, UTF-8, CompressMetadata,
/// ReceiveInternalMetadata — the literal §8 S1 handshake payload.
const BASE_MODES: u32 = 0x0400_0201;
/// `UseTSSC` feature bit.
const USE_TSSC: u32 = 0x0000_0400;

/// STTP subscriber client
#[derive(Parser, Debug)]
#[command(name = "sttp-subscriber")]
#[command(about = "Streaming Telemetry Transport Protocol subscriber")]
#[command(version)]
struct Args {
    /// Publisher command-channel address to connect to
    #[arg(long, default_value = "127.0.0.1:6165")]
    connect: String,

    /// TLS server name to verify, if --ca-cert is given
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// CA certificate (PEM format) for TLS
    #[arg(long)]
    ca_cert: Option<String>,

    /// Comma-separated measurement identifiers (signal IDs or
    /// `SOURCE:ID` pairs)
    #[arg(long, value_delimiter = ',')]
    input_measurement_keys: Vec<String>,

    /// Request the compact wire format
    #[arg(long, default_value = "true")]
    compact: bool,

    /// Request TSSC compression
    #[arg(long)]
    tssc: bool,

    /// Data-loss watchdog interval, in seconds
    #[arg(long, default_value = "10")]
    data_loss_interval_secs: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("STTP subscriber starting");

    let modes = BASE_MODES | if args.tssc { USE_TSSC } else { 0 };
    let config = SubscriberConfig {
        address: args.connect,
        server_name: args.server_name,
        ca_cert_path: args.ca_cert,
        desired_modes: OperationalModes::from_raw(modes),
        requested_keys: args.input_measurement_keys,
        compact: args.compact,
        include_time: true,
        reconnect: ReconnectPolicy { data_loss_interval_secs: args.data_loss_interval_secs, ..Default::default() },
    };

    driver::run(
        config,
        |measurements| {
            for measurement in &measurements {
                tracing::info!(
                    signal_id = %measurement.key.signal_id(),
                    value = ?measurement.value,
                    "measurement"
                );
            }
        },
        |dataset| {
            tracing::info!(tables = dataset.tables.len(), "metadata received");
        },
        |block| {
            tracing::info!(bytes = block.len(), "buffer block received");
        },
    )
    .await?;

    Ok(())
}
