//! Byte stream abstraction shared by plain TCP and TLS connections

use crate::error::{DulError, Result};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Any bidirectional stream the engine can run an association over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// How the requestor side opens its transport connection
#[derive(Clone)]
pub enum Connector {
    Tcp,
    Tls {
        connector: TlsConnector,
        server_name: ServerName<'static>,
    },
}

impl Connector {
    /// TLS connector for `hostname` using the given client configuration
    pub fn tls(config: rustls::ClientConfig, hostname: &str) -> Result<Self> {
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| DulError::Tls(format!("invalid server name {}: {}", hostname, e)))?;
        Ok(Connector::Tls {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Open a connection to `addr`
    pub async fn connect(&self, addr: &str) -> Result<BoxedTransport> {
        debug!(addr = addr, "Opening transport connection");
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;

        match self {
            Connector::Tcp => {
                info!(addr = addr, "TCP connection established");
                Ok(Box::new(tcp))
            }
            Connector::Tls {
                connector,
                server_name,
            } => {
                let stream = connector
                    .connect(server_name.clone(), tcp)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, addr = addr, "TLS handshake failed");
                        DulError::Tls(format!("TLS handshake with {} failed: {}", addr, e))
                    })?;
                info!(addr = addr, "TLS connection established");
                Ok(Box::new(stream))
            }
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::Tcp => f.write_str("Tcp"),
            Connector::Tls { server_name, .. } => {
                write!(f, "Tls({:?})", server_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_yields_usable_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut transport = Connector::Tcp.connect(&addr).await.unwrap();
        transport.write_all(b"PING").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"PING");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(matches!(
            Connector::Tcp.connect(&addr).await,
            Err(DulError::Io(_))
        ));
    }
}
