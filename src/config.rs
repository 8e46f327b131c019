//! Configuration module for pingwatch.
//!
//! `MonitorConfig` is passed explicitly into the host manager; `ServerConfig`
//! is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::probe::ProbeMode;

/// Tunables of the monitoring core.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Floor applied to every polling interval (default: 200ms)
    pub min_interval: Duration,
    /// Interval used when a caller does not pick one (default: 1s)
    pub default_interval: Duration,
    /// Wall-clock cap on one probe, all fallbacks included (default: 4s)
    pub probe_timeout: Duration,
    /// Timeout handed to each strategy of a probe chain (default: 1s)
    pub attempt_timeout: Duration,
    /// How long remove/stop-all wait for a worker to exit (default: 2s)
    pub shutdown_grace: Duration,
    /// Upper bound of the random delay before a worker's first probe (default: 100ms)
    pub start_jitter: Duration,
    /// Capacity of the shared update channel (default: 1000)
    pub channel_capacity: usize,
    /// Samples kept per target (default: 3000)
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(200),
            default_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
            start_jitter: Duration::from_millis(100),
            channel_capacity: 1000,
            history_capacity: 3000,
        }
    }
}

impl MonitorConfig {
    /// Clamp an interval to the configured floor.
    pub fn clamp_interval(&self, interval: Duration) -> Duration {
        interval.max(self.min_interval)
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Path to the persisted target list (default: "hosts.json")
    pub hosts_path: PathBuf,
    /// Which probe chain to build (default: system)
    pub probe_mode: ProbeMode,
    pub monitor: MonitorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            hosts_path: PathBuf::from("hosts.json"),
            probe_mode: ProbeMode::System,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGWATCH_HOSTS_PATH`: persisted target list (default: "hosts.json")
    /// - `PINGWATCH_INTERVAL`: default polling interval in seconds (default: 1)
    /// - `PINGWATCH_HISTORY`: history samples per target (default: 3000)
    /// - `PINGWATCH_PROBE`: `system`, `icmp`, `command`, `tcp:<port>` or `http`
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port_str) = lookup("PINGWATCH_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => cfg.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid PINGWATCH_HTTP_PORT: {}", port_str),
            }
        }

        if let Some(path) = lookup("PINGWATCH_HOSTS_PATH") {
            cfg.hosts_path = PathBuf::from(path);
        }

        if let Some(secs) = lookup("PINGWATCH_INTERVAL") {
            match secs.parse::<f64>().ok().filter(|s| *s > 0.0).map(Duration::try_from_secs_f64) {
                Some(Ok(interval)) => {
                    cfg.monitor.default_interval = cfg.monitor.clamp_interval(interval);
                }
                _ => tracing::warn!("Ignoring invalid PINGWATCH_INTERVAL: {}", secs),
            }
        }

        if let Some(history) = lookup("PINGWATCH_HISTORY") {
            match history.parse::<usize>() {
                Ok(n) if n > 0 => cfg.monitor.history_capacity = n,
                _ => tracing::warn!("Ignoring invalid PINGWATCH_HISTORY: {}", history),
            }
        }

        if let Some(mode) = lookup("PINGWATCH_PROBE") {
            match mode.parse() {
                Ok(m) => cfg.probe_mode = m,
                Err(e) => tracing::warn!("Ignoring PINGWATCH_PROBE: {}", e),
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.hosts_path, PathBuf::from("hosts.json"));
        assert_eq!(cfg.monitor.min_interval, Duration::from_millis(200));
        assert_eq!(cfg.monitor.channel_capacity, 1000);
        assert_eq!(cfg.monitor.history_capacity, 3000);
    }

    #[test]
    fn test_clamp_interval() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.clamp_interval(Duration::from_millis(50)), Duration::from_millis(200));
        assert_eq!(cfg.clamp_interval(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_env_values() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("PINGWATCH_HTTP_PORT", "9090"),
            ("PINGWATCH_HOSTS_PATH", "/tmp/targets.json"),
            ("PINGWATCH_INTERVAL", "0.05"),
            ("PINGWATCH_HISTORY", "10"),
            ("PINGWATCH_PROBE", "tcp:443"),
        ]));
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.hosts_path, PathBuf::from("/tmp/targets.json"));
        // Clamped to the floor
        assert_eq!(cfg.monitor.default_interval, Duration::from_millis(200));
        assert_eq!(cfg.monitor.history_capacity, 10);
        assert_eq!(cfg.probe_mode, ProbeMode::Tcp(443));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("PINGWATCH_HTTP_PORT", "not-a-port"),
            ("PINGWATCH_INTERVAL", "-3"),
            ("PINGWATCH_HISTORY", "0"),
            ("PINGWATCH_PROBE", "carrier-pigeon"),
        ]));
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.monitor.default_interval, Duration::from_secs(1));
        assert_eq!(cfg.monitor.history_capacity, 3000);
        assert_eq!(cfg.probe_mode, ProbeMode::System);
    }
}
