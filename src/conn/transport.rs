//! Transport dialing.
//!
//! The session dials through a [`Transport`] so tests can hand it an
//! in-process stream and so an embedding application can supply a TLS or
//! proxy dialer. The built-in [`TcpTransport`] handles the plaintext case
//! only.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::CONNECT_TIMEOUT;

/// Object-safe alias for the byte streams connections run over.
pub trait ConnStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ConnStream for T {}

impl std::fmt::Debug for dyn ConnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnStream")
    }
}

pub type BoxedStream = Box<dyn ConnStream>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a byte stream to `host:port`. `secure` asks for an encrypted
    /// transport; dialers that cannot provide one must fail rather than
    /// silently connect in plaintext.
    async fn connect(&self, host: &str, port: u16, secure: bool) -> Result<BoxedStream>;
}

/// Plain TCP dialing with the standard connect timeout.
#[derive(Debug, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16, secure: bool) -> Result<BoxedStream> {
        if secure {
            bail!("encrypted transport requested but no TLS dialer is configured");
        }
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("connect to {host}:{port} timed out"))?
            .with_context(|| format!("connect to {host}:{port} failed"))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_secure_connects() {
        let err = TcpTransport
            .connect("127.0.0.1", 1, true)
            .await
            .expect_err("secure connect must fail");
        assert!(err.to_string().contains("TLS"));
    }

    #[tokio::test]
    async fn dials_a_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        TcpTransport
            .connect("127.0.0.1", port, false)
            .await
            .expect("plain connect");
        accept.await.unwrap().unwrap();
    }
}
