//! Probe module for reachability checks.
//!
//! A [`Prober`] turns a target into a [`ProbeOutcome`]. The stock
//! implementation is a [`ProbeChain`]: an ordered list of transport
//! strategies (native ICMP, the system `ping` utility, TCP connect, HTTP)
//! tried in sequence until one succeeds.

mod chain;
mod http;
mod ping;
mod tcp;

pub use chain::*;
pub use http::*;
pub use ping::*;
pub use tcp::*;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl ProbeError {
    /// Text suitable for showing next to a target.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Command(output) => last_line(output),
            other => other.to_string(),
        }
    }
}

/// Result of one probe, as seen by the monitoring core.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: Option<f64>,
    /// Last diagnostic line of the probe, for display only.
    pub message: String,
}

impl ProbeOutcome {
    pub fn up(latency_ms: Option<f64>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            latency_ms,
            message: message.into(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms: None,
            message: message.into(),
        }
    }
}

/// Capability to check one target once.
///
/// Implementations must return within a bounded time and report failures as
/// a down outcome rather than an error.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, target: &str) -> ProbeOutcome;
}

/// Successful strategy attempt.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Round trip in milliseconds, when the transport could measure one.
    pub latency_ms: Option<f64>,
    /// Raw output of the attempt.
    pub output: String,
}

/// One transport variant of a [`ProbeChain`].
#[async_trait]
pub trait ProbeStrategy: Send + Sync + 'static {
    /// Short label used in logs.
    fn name(&self) -> String;

    async fn attempt(&self, target: &str, timeout: Duration) -> Result<Reply, ProbeError>;
}

/// Address family restriction of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

impl AddressFamily {
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => ip.is_ipv4(),
            Self::V6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::V4 => f.write_str("ipv4"),
            Self::V6 => f.write_str("ipv6"),
        }
    }
}

/// Resolve a target to an address of the requested family.
pub async fn resolve_address(address: &str, family: AddressFamily) -> Result<IpAddr, ProbeError> {
    // Try direct parse first
    if let Ok(ip) = address.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        if family.matches(&ip) {
            return Ok(ip);
        }
        return Err(ProbeError::Network(format!("{} is not an {} address", address, family)));
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .map(|sa| sa.ip())
        .find(|ip| family.matches(ip))
        .ok_or_else(|| ProbeError::Network(format!("No {} addresses found for {}", family, address)))
}

/// Last non-empty line of some probe output.
pub fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Which probe chain to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Native ICMP when available, otherwise the `ping` command.
    System,
    Icmp,
    Command,
    Tcp(u16),
    Http,
}

impl FromStr for ProbeMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "system" => Ok(Self::System),
            "icmp" => Ok(Self::Icmp),
            "command" => Ok(Self::Command),
            "http" => Ok(Self::Http),
            other => {
                if let Some(port) = other.strip_prefix("tcp:") {
                    return port
                        .parse()
                        .map(Self::Tcp)
                        .map_err(|_| ProbeError::Config(format!("invalid tcp port: {}", port)));
                }
                Err(ProbeError::Config(format!("unknown probe mode: {}", other)))
            }
        }
    }
}
