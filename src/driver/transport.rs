//! Socket transport (TCP with optional TLS)

use super::tls::{parse_server_name, TlsConfig};
use crate::uri::HostPort;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// One pooled socket: plain or TLS-encrypted
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

fn require_port(host: &HostPort) -> io::Result<u16> {
    host.port.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no port for host '{}' (SRV lookup is not supported)", host.host),
        )
    })
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect(host: &HostPort) -> io::Result<Self> {
        let port = require_port(host)?;
        let stream = TcpStream::connect((host.host.as_str(), port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Plain(stream))
    }

    /// Connect via TLS-encrypted TCP
    pub async fn connect_tls(host: &HostPort, tls: &TlsConfig) -> io::Result<Self> {
        let port = require_port(host)?;
        let tcp_stream = TcpStream::connect((host.host.as_str(), port)).await?;
        tcp_stream.set_nodelay(true)?;

        // SNI
        let server_name = parse_server_name(&host.host)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let server_name = rustls_pki_types::ServerName::try_from(server_name).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid hostname for TLS: {}", host.host),
            )
        })?;

        let connector = tokio_rustls::TlsConnector::from(tls.client_config());
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("TLS handshake failed: {}", e)))?;

        Ok(Transport::Tls(tls_stream))
    }

    /// Whether the socket is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Remote address
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Transport::Plain(stream) => stream.peer_addr(),
            Transport::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    /// Flush and shut down the socket
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => {
                stream.flush().await?;
                stream.shutdown().await
            }
            Transport::Tls(stream) => {
                stream.flush().await?;
                stream.shutdown().await
            }
        }
    }
}
