//! Ordered fallback chain of probe strategies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{
    icmp_available, AddressFamily, CommandProbe, HttpProbe, IcmpProbe, ProbeError, ProbeMode,
    ProbeOutcome, ProbeStrategy, Prober, TcpConnectProbe,
};

/// Extra time granted to an attempt on top of its own timeout, to cover
/// process start-up and name resolution.
const ATTEMPT_GRACE: Duration = Duration::from_millis(500);

/// Kept back from the budget so the chain finishes before its caller's timeout.
const BUDGET_MARGIN: Duration = Duration::from_millis(50);

/// Tries each strategy in order and stops at the first success.
pub struct ProbeChain {
    strategies: Vec<Arc<dyn ProbeStrategy>>,
    attempt_timeout: Duration,
    budget: Option<Duration>,
}

impl ProbeChain {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            strategies: Vec::new(),
            attempt_timeout,
            budget: None,
        }
    }

    /// Bound the whole chain. Later attempts get what is left of the budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_strategy(mut self, strategy: impl ProbeStrategy) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Build the chain for a configured probe mode.
    ///
    /// ICMP and command chains try the default family first, then IPv4 and
    /// IPv6 explicitly.
    pub fn for_mode(mode: ProbeMode, attempt_timeout: Duration) -> Self {
        let chain = Self::new(attempt_timeout);
        let families = [AddressFamily::Any, AddressFamily::V4, AddressFamily::V6];

        match mode {
            ProbeMode::System if icmp_available() => Self::for_mode(ProbeMode::Icmp, attempt_timeout),
            ProbeMode::System => Self::for_mode(ProbeMode::Command, attempt_timeout),
            ProbeMode::Icmp => families
                .into_iter()
                .fold(chain, |c, family| c.with_strategy(IcmpProbe::new(family))),
            ProbeMode::Command => families
                .into_iter()
                .fold(chain, |c, family| c.with_strategy(CommandProbe::new(family))),
            ProbeMode::Tcp(port) => chain.with_strategy(TcpConnectProbe::new(port)),
            ProbeMode::Http => chain.with_strategy(HttpProbe::new()),
        }
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl Prober for ProbeChain {
    async fn probe(&self, target: &str) -> ProbeOutcome {
        let mut message = String::new();
        let deadline = self
            .budget
            .map(|budget| Instant::now() + budget.saturating_sub(BUDGET_MARGIN));

        for strategy in &self.strategies {
            let start = Instant::now();
            let mut attempt_timeout = self.attempt_timeout;
            let mut limit = attempt_timeout + ATTEMPT_GRACE;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(start);
                if remaining.is_zero() {
                    tracing::debug!(host = %target, "Probe budget exhausted before {}", strategy.name());
                    break;
                }
                limit = limit.min(remaining);
                attempt_timeout = attempt_timeout.min(limit);
            }

            let result = match tokio::time::timeout(limit, strategy.attempt(target, attempt_timeout)).await {
                Ok(r) => r,
                Err(_) => Err(ProbeError::Timeout(limit)),
            };

            match result {
                Ok(reply) => {
                    // Fall back to wall-clock time when the transport gave no latency
                    let latency = reply
                        .latency_ms
                        .unwrap_or_else(|| start.elapsed().as_secs_f64() * 1000.0);
                    return ProbeOutcome::up(Some(latency), super::last_line(&reply.output));
                }
                Err(e) => {
                    tracing::debug!(
                        host = %target,
                        strategy = %strategy.name(),
                        "Probe attempt failed: {}",
                        e
                    );
                    message = e.diagnostic();
                }
            }
        }

        ProbeOutcome::down(message)
    }
}
