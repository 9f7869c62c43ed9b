//! TCP command-channel transport, with optional mutual-TLS via `rustls`.
//!
//! Unlike the teacher's Quinn/QUIC transport, STTP's command channel is a
//! reliable ordered bytestream (§6) — a plain TCP listener, optionally
//! wrapped in TLS. The certificate-loading and self-signed-for-testing
//! fallback are carried over from the teacher's transport module unchanged
//! in spirit: PEM files when given, `rcgen` otherwise.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ServerConfig;
use rustls::pki_types::PrivatePkcs8KeyDer;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

use crate::error::ServerError;

/// A bound TCP listener, optionally wrapping accepted connections in TLS.
pub struct TcpTransport {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl TcpTransport {
    /// Binds a listener. If `cert_path`/`key_path` are both given, wraps
    /// accepted connections in TLS using that certificate; if neither is
    /// given, connections are plaintext; a self-signed certificate is
    /// generated when `generate_self_signed` is set and no cert was given
    /// (for local testing only, matching the teacher's warning).
    pub async fn bind(
        address: &str,
        cert_path: Option<String>,
        key_path: Option<String>,
        generate_self_signed: bool,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        let acceptor = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsAcceptor::from(Arc::new(load_tls_config(&cert, &key)?))),
            _ if generate_self_signed => {
                tracing::warn!("using self-signed certificate - not for production use!");
                Some(TlsAcceptor::from(Arc::new(generate_self_signed_config()?)))
            },
            _ => None,
        };

        tracing::info!(%addr, tls = acceptor.is_some(), "command channel bound");
        Ok(Self { listener, acceptor })
    }

    /// Accepts one inbound connection, completing the TLS handshake if this
    /// transport is configured for TLS.
    pub async fn accept(&self) -> Result<(Connection, SocketAddr), ServerError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))?;
        stream.set_nodelay(true).map_err(|e| ServerError::Transport(e.to_string()))?;

        let connection = match &self.acceptor {
            Some(acceptor) => {
                let tls = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| ServerError::Tls(format!("handshake with {peer} failed: {e}")))?;
                Connection::Tls(Box::new(tls))
            },
            None => Connection::Plain(stream),
        };
        Ok((connection, peer))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(|e| ServerError::Transport(e.to_string()))
    }
}

/// Either a plaintext TCP stream or a TLS-wrapped one; the session driver
/// reads/writes through this without caring which.
pub enum Connection {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Connection {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_flush(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    let cert_pem =
        std::fs::read(cert_path).map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem =
        std::fs::read(key_path).map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("invalid TLS config: {e}")))
}

fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Tls(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .map_err(|e| ServerError::Tls(format!("invalid TLS config: {e}")))
}
