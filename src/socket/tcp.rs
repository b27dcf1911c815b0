//! TCP stream provider for Wi-Fi and development links.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::connection::{BoxedStream, Connector};
use crate::error::TransportError;
use crate::types::Target;
use crate::Result;

/// Opens a plain TCP socket to the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, target: &Target) -> Result<BoxedStream> {
        let stream = TcpStream::connect(target.addr())
            .await
            .map_err(|e| TransportError::Io(format!("{}: {}", target.addr(), e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn opens_local_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = TcpConnector.open(&Target::new("127.0.0.1", port)).await;
        assert!(stream.is_ok());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = TcpConnector
            .open(&Target::new("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::Transport(TransportError::Io(_))));
    }
}
