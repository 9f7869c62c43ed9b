//! TCP command-channel client transport, with optional TLS via `rustls`.
//!
//! Mirrors `sttp-server`'s `transport.rs`: a plain TCP connection, optionally
//! wrapped in TLS when a CA certificate is configured.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ClientConfig;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::ClientError;

/// Dials the publisher's command channel. When `ca_cert_path` is given, the
/// connection is upgraded to TLS, verifying the peer against that CA; when
/// absent, the connection is plaintext.
pub async fn connect(
    address: &str,
    server_name: &str,
    ca_cert_path: Option<String>,
) -> Result<Connection, ClientError> {
    let stream =
        TcpStream::connect(address).await.map_err(|e| ClientError::Transport(format!("connect to {address}: {e}")))?;
    stream.set_nodelay(true).map_err(|e| ClientError::Transport(e.to_string()))?;

    match ca_cert_path {
        Some(path) => {
            let config = load_client_config(&path)?;
            let connector = TlsConnector::from(Arc::new(config));
            let name = ServerName::try_from(server_name.to_string())
                .map_err(|e| ClientError::Tls(format!("invalid server name '{server_name}': {e}")))?;
            let tls = connector
                .connect(name, stream)
                .await
                .map_err(|e| ClientError::Tls(format!("handshake with {address} failed: {e}")))?;
            Ok(Connection::Tls(Box::new(tls)))
        },
        None => Ok(Connection::Plain(stream)),
    }
}

/// Either a plaintext TCP stream or a TLS-wrapped one.
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

fn load_client_config(ca_cert_path: &str) -> Result<ClientConfig, ClientError> {
    let pem = std::fs::read(ca_cert_path)
        .map_err(|e| ClientError::Config(format!("failed to read CA cert '{ca_cert_path}': {e}")))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Config(format!("failed to parse CA cert: {e}")))?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots.add(cert).map_err(|e| ClientError::Tls(format!("invalid CA certificate: {e}")))?;
    }

    Ok(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}
