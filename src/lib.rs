//! pingwatch - concurrent host availability monitor.
//!
//! A [`HostManager`] runs one worker per target. Each worker probes its
//! target through a [`Prober`], folds the result into its [`HostStats`] and
//! publishes a copy on a bounded [`UpdateStream`]. Consumers drain the stream
//! or take a [`HostManager::snapshot`].

pub mod alerts;
pub mod config;
pub mod hosts;
pub mod monitor;
pub mod probe;
pub mod stats;
pub mod web;

pub use config::{MonitorConfig, ServerConfig};
pub use monitor::{HostManager, UpdateStream};
pub use probe::{ProbeChain, ProbeOutcome, Prober};
pub use stats::{History, HistorySample, HostStats, HostStatus};
