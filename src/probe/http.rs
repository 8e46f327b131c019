//! HTTP probe implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ProbeError, ProbeStrategy, Reply};

/// Times a full GET request against the target.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Turn a bare host into a URL.
fn target_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[async_trait]
impl ProbeStrategy for HttpProbe {
    fn name(&self) -> String {
        "http".to_string()
    }

    async fn attempt(&self, target: &str, timeout: Duration) -> Result<Reply, ProbeError> {
        let url = target_url(target);
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout)
                } else {
                    ProbeError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        // Read the full body to measure complete transfer time
        let _body = response
            .bytes()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(Reply {
            latency_ms: Some(ms),
            output: format!("{} {}: time={:.3} ms", url, status, ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url() {
        assert_eq!(target_url("example.com"), "http://example.com");
        assert_eq!(target_url("https://example.com/x"), "https://example.com/x");
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let result = HttpProbe::new()
            .attempt("http://256.256.256.256", Duration::from_millis(100))
            .await;
        assert!(result.is_err());
    }
}
