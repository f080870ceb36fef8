//! TCP and TLS transport implementation
//!
//! One connection at a time, targeting the configured server list in
//! rotation so a dead receiver doesn't pin the agent to it. Each
//! established connection runs a reader task (decodes frames onto the
//! incoming channel) and a writer task (drains the outgoing channel and
//! emits a credit token after every accepted write).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use skiff_config::{NetworkConfig, TransportKind};
use skiff_protocol::{read_frame, write_frame};

use crate::{Connection, Incoming, Transport, TransportError};

/// How long a TCP connect or TLS handshake may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive probe time
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Incoming channel depth; server messages are small and the publisher
/// drains them promptly
const INCOMING_QUEUE: usize = 16;

/// TCP transport, optionally wrapped in TLS
pub struct TcpTransport {
    config: NetworkConfig,
    tls: Option<TlsConnector>,
    next_server: usize,
}

impl TcpTransport {
    /// Build a transport from the network configuration
    ///
    /// Certificate material is loaded once here, not per reconnect.
    pub fn new(config: NetworkConfig) -> Result<Self, TransportError> {
        if config.servers.is_empty() {
            return Err(TransportError::NoServers);
        }

        let tls = match config.transport {
            TransportKind::Tls => Some(build_tls_connector(&config)?),
            TransportKind::Tcp => None,
        };

        Ok(Self {
            config,
            tls,
            next_server: 0,
        })
    }

    /// The server targeted by the next connect, rotating through the list
    fn pick_server(&mut self) -> String {
        let server = self.config.servers[self.next_server % self.config.servers.len()].clone();
        self.next_server = self.next_server.wrapping_add(1);
        server
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<Connection, TransportError> {
        let server = self.pick_server();

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&server)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::ConnectFailed {
                    server,
                    source,
                });
            }
            Err(_) => return Err(TransportError::ConnectTimeout { server }),
        };

        configure_socket(&stream);

        let connection = match &self.tls {
            Some(connector) => {
                let name = tls_server_name(&server)?;
                let tls_stream = match timeout(CONNECT_TIMEOUT, connector.connect(name, stream))
                    .await
                {
                    Ok(Ok(tls_stream)) => tls_stream,
                    Ok(Err(source)) => {
                        return Err(TransportError::Handshake { server, source });
                    }
                    Err(_) => return Err(TransportError::ConnectTimeout { server }),
                };
                spawn_io(tls_stream)
            }
            None => spawn_io(stream),
        };

        tracing::debug!(server = %server, transport = self.config.transport.as_str(), "connected");

        Ok(connection)
    }
}

/// Set TCP_NODELAY and keepalive; both are best-effort
fn configure_socket(stream: &TcpStream) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(%error, "failed to set TCP_NODELAY");
    }

    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(error) = sock_ref.set_tcp_keepalive(&keepalive) {
        tracing::debug!(%error, "failed to set TCP keepalive");
    }
}

/// Spawn reader/writer tasks over an established stream
fn spawn_io<S>(stream: S) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Capacity 1: one token means "a write will be accepted now"; a
    // queued second token would promise buffer space we don't have.
    let (credit_tx, credit_rx) = mpsc::channel(1);
    let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<([u8; 4], Bytes)>(1);

    // The publisher may send as soon as the connection is up
    let _ = credit_tx.try_send(());

    let write_errors = incoming_tx.clone();

    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(frame) => {
                    if incoming_tx.send(Incoming::Frame(frame)).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    let _ = incoming_tx.send(Incoming::Error(error.into())).await;
                    break;
                }
            }
        }
    });

    let writer_task = tokio::spawn(async move {
        while let Some((signature, body)) = outgoing_rx.recv().await {
            if let Err(error) = write_frame(&mut writer, signature, &body).await {
                let _ = write_errors.send(Incoming::Error(error.into())).await;
                break;
            }
            // A full credit queue already promises the next write
            let _ = credit_tx.try_send(());
        }
    });

    Connection::new(
        credit_rx,
        incoming_rx,
        outgoing_tx,
        vec![reader_task, writer_task],
    )
}

/// Derive the TLS server name from a `host:port` entry
fn tls_server_name(server: &str) -> Result<ServerName<'static>, TransportError> {
    let host = server
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(server);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string()).map_err(|_| TransportError::InvalidServerName {
        server: server.to_string(),
    })
}

/// Load CA (and optional client identity) into a rustls connector
fn build_tls_connector(config: &NetworkConfig) -> Result<TlsConnector, TransportError> {
    let ca_path = config
        .ssl_ca
        .as_deref()
        .ok_or_else(|| TransportError::certificate("ssl_ca", "not configured"))?;

    let ca_pem = std::fs::read(ca_path)
        .map_err(|e| TransportError::certificate(ca_path, e.to_string()))?;

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_pem.as_slice()) {
        let cert = cert.map_err(|e| TransportError::certificate(ca_path, e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| TransportError::certificate(ca_path, e.to_string()))?;
    }

    if roots.is_empty() {
        return Err(TransportError::certificate(
            ca_path,
            "no certificates found in PEM bundle",
        ));
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let client_config = match (&config.ssl_certificate, &config.ssl_key) {
        (Some(cert_path), Some(key_path)) => {
            let cert_pem = std::fs::read(cert_path)
                .map_err(|e| TransportError::certificate(cert_path, e.to_string()))?;
            let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| TransportError::certificate(cert_path, e.to_string()))?;

            let key_pem = std::fs::read(key_path)
                .map_err(|e| TransportError::certificate(key_path, e.to_string()))?;
            let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                .map_err(|e| TransportError::certificate(key_path, e.to_string()))?
                .ok_or_else(|| TransportError::certificate(key_path, "no private key found"))?;

            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TransportError::certificate(cert_path, e.to_string()))?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(client_config)))
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
