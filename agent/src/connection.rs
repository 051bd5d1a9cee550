//! Connection management
//!
//! A [`Connector`] hands out fresh, exclusively owned connections. Dropping a
//! connection closes it, so every exit path releases it.

use crate::retry::{retry_with_backoff, RetryError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delay before the second connect attempt; doubles afterwards
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("connect to {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {address} abandoned: shutdown requested")]
    Cancelled { address: String },
}

/// Byte stream the codec can run over
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Opens connections to the aggregation server
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// Address used in logs and errors
    fn address(&self) -> &str;

    async fn connect(&self) -> Result<Self::Conn, ConnectError>;
}

/// Plain TCP connector
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, ConnectError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ConnectError::Timeout {
                address: self.address.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| ConnectError::Io {
                address: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        debug!("Connected to {}", self.address);
        Ok(stream)
    }
}

/// Connect with up to `attempts` tries and exponential backoff in between.
pub async fn connect_with_retry<C: Connector + ?Sized>(
    connector: &C,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<C::Conn, ConnectError> {
    let address = connector.address().to_string();
    retry_with_backoff("connect", attempts, CONNECT_BACKOFF, cancel, |_| {
        connector.connect()
    })
    .await
    .map_err(|e| match e {
        RetryError::Exhausted(err) => err,
        RetryError::Cancelled => ConnectError::Cancelled { address },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;

    struct FlakyConnector {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        type Conn = DuplexStream;

        fn address(&self) -> &str {
            "flaky:1"
        }

        async fn connect(&self) -> Result<DuplexStream, ConnectError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.failures {
                return Err(ConnectError::Io {
                    address: "flaky:1".to_string(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                });
            }
            Ok(tokio::io::duplex(64).0)
        }
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connector = TcpConnector::new(addr.clone(), Duration::from_secs(1));
        assert_eq!(connector.address(), addr);
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_is_an_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(addr, Duration::from_secs(1));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. } | ConnectError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_recovers() {
        let connector = FlakyConnector {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let token = CancellationToken::new();
        assert!(connect_with_retry(&connector, 3, &token).await.is_ok());
        assert_eq!(connector.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up() {
        let connector = FlakyConnector {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let token = CancellationToken::new();
        let err = connect_with_retry(&connector, 2, &token).await.unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
        assert_eq!(connector.calls.load(Ordering::Relaxed), 2);
    }
}
