//! TCP connect probe.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{resolve_address, AddressFamily, ProbeError, ProbeStrategy, Reply};

/// Measures how long a TCP handshake with `target:port` takes.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    port: u16,
}

impl TcpConnectProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl ProbeStrategy for TcpConnectProbe {
    fn name(&self) -> String {
        format!("tcp:{}", self.port)
    }

    async fn attempt(&self, target: &str, probe_timeout: Duration) -> Result<Reply, ProbeError> {
        let ip = resolve_address(target, AddressFamily::Any).await?;
        let addr = SocketAddr::new(ip, self.port);

        let start = Instant::now();
        match timeout(probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                let ms = start.elapsed().as_secs_f64() * 1000.0;
                Ok(Reply {
                    latency_ms: Some(ms),
                    output: format!("connected to {}: time={:.3} ms", addr, ms),
                })
            }
            Ok(Err(e)) => Err(ProbeError::Network(format!("connect to {} failed: {}", addr, e))),
            Err(_) => Err(ProbeError::Timeout(probe_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reply = TcpConnectProbe::new(port)
            .attempt("127.0.0.1", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reply.latency_ms.unwrap() >= 0.0);
        assert!(reply.output.starts_with("connected to 127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port() {
        // Bind then drop to find a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = TcpConnectProbe::new(port)
            .attempt("127.0.0.1", Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
