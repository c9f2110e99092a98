//! Loopback TCP endpoints

use super::CONNECT_RETRY_INTERVAL;
use crate::result::TransportError;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::debug;

/// Bind the capture side's listener on `127.0.0.1:port`.
///
/// Port 0 picks a free port; read it back with `local_addr`.
pub async fn bind(port: u16) -> Result<TcpListener, TransportError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    debug!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

/// Accept the host's connection.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), TransportError> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    debug!(%peer, "host connected");
    Ok((stream, peer))
}

/// Connect to the capture process, retrying while nothing listens yet.
pub async fn connect(port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let deadline = Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%addr, "connected");
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {}
            Err(source) => {
                return Err(TransportError::Connect {
                    endpoint: addr.to_string(),
                    source,
                })
            }
        }
        if Instant::now() >= deadline {
            return Err(TransportError::ConnectTimeout {
                endpoint: addr.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ByteChannel, Connection, Received};

    #[tokio::test]
    async fn test_loopback_roundtrip() {
        let listener = bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = accept(&listener).await.unwrap();
            let mut conn = Connection::from_stream(stream, "host");
            conn.send(b"from capture").await.unwrap();
            conn.close().await;
        });

        let stream = connect(port, Duration::from_secs(2)).await.unwrap();
        let mut conn = Connection::from_stream(stream, "capture");

        let mut received = Vec::new();
        loop {
            match conn.receive(64, Duration::from_secs(2)).await.unwrap() {
                Received::Data(bytes) => received.extend_from_slice(&bytes),
                Received::Idle => panic!("capture side stalled"),
                Received::Closed => break,
            }
        }
        assert_eq!(received, b"from capture");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_timeout() {
        // Grab a free port, then release it so nothing listens there.
        let port = {
            let listener = bind(0).await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = connect(port, Duration::from_millis(300)).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectTimeout { .. })
        ));
    }
}
