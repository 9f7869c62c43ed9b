//! Streaming Telemetry Transport Protocol publisher runtime.
//!
//! This crate provides production "glue" that wraps `sttp-core`'s
//! action-based session logic with real I/O. [`PublisherSession`] follows
//! the sans-IO pattern (see `sttp-core` for details); [`Server`] drives it
//! over a TCP (optionally TLS) command channel using Tokio.
//!
//! # Components
//!
//! - [`MetadataStore`]: the publisher's measurement catalog
//! - [`ConnectionRegistry`]: live-connection bookkeeping
//! - [`TcpTransport`]: the command-channel listener
//! - [`SystemEnv`]: production environment (real time, crypto RNG)
//!
//! Measurement ingestion — i.e. the host application's adapter/routing
//! framework that turns field devices into [`Measurement`]s — is outside
//! this crate's scope. [`Server`] instead fans live measurements out over an
//! internally owned broadcast channel; [`Server::measurement_sender`]
//! exposes the injection point for a real upstream, and [`demo_source`]
//! offers a synthetic generator so the binary is runnable end to end
//! without one.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod demo_source;
mod error;
mod metadata_store;
mod registry;
mod session_driver;
mod system_env;
mod transport;

use std::sync::Arc;
use std::time::Duration;

pub use error::ServerError;
pub use metadata_store::MetadataStore;
pub use registry::{ConnectionRegistry, SessionInfo};
use sttp_core::{Environment, Measurement};
pub use system_env::SystemEnv;
use tokio::sync::broadcast;
pub use transport::{Connection, TcpTransport};

/// Runtime configuration for [`Server::bind`].
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind the command channel to (e.g. `"0.0.0.0:6165"`).
    pub bind_address: String,
    /// Path to a PEM certificate, if TLS is configured.
    pub cert_path: Option<String>,
    /// Path to a PEM private key, if TLS is configured.
    pub key_path: Option<String>,
    /// Generate a self-signed certificate when no cert/key is given.
    pub generate_self_signed: bool,
    /// Maximum number of concurrently connected sessions.
    pub max_connections: usize,
    /// Interval between periodic cipher-key rotations (§4.8).
    pub cipher_rotation: Duration,
    /// Interval between buffer-block retransmit sweeps (§4.9): any
    /// outstanding block not yet acknowledged via `ConfirmBufferBlock` is
    /// re-sent.
    pub buffer_block_retransmit: Duration,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6165".to_string(),
            cert_path: None,
            key_path: None,
            generate_self_signed: false,
            max_connections: 64,
            cipher_rotation: Duration::from_secs(60),
            buffer_block_retransmit: Duration::from_secs(5),
        }
    }
}

/// Production STTP publisher.
pub struct Server {
    transport: TcpTransport,
    metadata_store: Arc<MetadataStore>,
    registry: Arc<ConnectionRegistry>,
    env: SystemEnv,
    config: ServerRuntimeConfig,
    measurement_tx: broadcast::Sender<Arc<Vec<Measurement>>>,
}

impl Server {
    /// Binds a new server. The returned instance owns a measurement catalog
    /// that callers populate via [`Server::metadata_store`] before `run`.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let transport = TcpTransport::bind(
            &config.bind_address,
            config.cert_path.clone(),
            config.key_path.clone(),
            config.generate_self_signed,
        )
        .await?;
        let (measurement_tx, _) = broadcast::channel(1024);

        Ok(Self {
            transport,
            metadata_store: Arc::new(MetadataStore::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            env: SystemEnv::new(),
            config,
            measurement_tx,
        })
    }

    /// The measurement catalog, for registering signals before serving.
    #[must_use]
    pub fn metadata_store(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.metadata_store)
    }

    /// The injection point for live measurements: anything sent here is
    /// fanned out to every connected, subscribed session.
    #[must_use]
    pub fn measurement_sender(&self) -> broadcast::Sender<Arc<Vec<Measurement>>> {
        self.measurement_tx.clone()
    }

    /// Local address the command channel is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accepts connections until the process is terminated.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "publisher listening");

        let mut next_session_id: u64 = 0;
        loop {
            let (conn, peer) = match self.transport.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    continue;
                },
            };

            next_session_id += 1;
            let session_id = next_session_id;
            if !self.registry.register(session_id, peer, self.config.max_connections) {
                tracing::warn!(%peer, "connection refused: max_connections reached");
                continue;
            }

            let metadata_store = Arc::clone(&self.metadata_store);
            let registry = Arc::clone(&self.registry);
            let measurements = self.measurement_tx.subscribe();
            let env = self.env.clone();
            let cipher_rotation = self.config.cipher_rotation;
            let buffer_block_retransmit = self.config.buffer_block_retransmit;

            tokio::spawn(async move {
                if let Err(error) = session_driver::run_session(
                    conn,
                    peer,
                    metadata_store,
                    measurements,
                    env,
                    cipher_rotation,
                    buffer_block_retransmit,
                )
                .await
                {
                    tracing::warn!(%peer, %error, "session ended with an error");
                }
                registry.unregister(session_id);
            });
        }
    }
}
