//! Connection-count driven registration loop
//!
//! Level-triggered: every tick compares the live connection count against
//! the low-water threshold and drives the registration state toward the
//! desired value. A transition whose target already matches the recorded
//! state is skipped, and the whole decide-and-call sequence runs under the
//! process-wide registration lock.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::metrics;
use crate::state::{shutdown_signalled, SharedState};
use crate::utils::retry::RetryConfig;

use super::hosts::{HostEntry, HostTags};
use super::{Discovery, DiscoveryError};

/// Jitter fraction added to backed-off ticks
const BACKOFF_JITTER: f64 = 0.2;

/// Registration state the current load calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desired {
    Registered,
    Deregistered,
}

impl Desired {
    /// Advertise while strictly below `threshold` connections
    pub fn for_load(active: usize, threshold: usize) -> Self {
        if active < threshold {
            Self::Registered
        } else {
            Self::Deregistered
        }
    }
}

/// Result of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Entry added to discovery
    Registered,

    /// Entry removed from discovery
    Deregistered,

    /// Recorded state already matched; no call made
    Unchanged(Desired),
}

/// Keeps this instance's discovery entry in line with its load
pub struct EndpointAdvertiser {
    discovery: Arc<dyn Discovery>,
    state: SharedState,
    self_entry: HostEntry,
    threshold: usize,
    tick: Duration,
    startup_delay: Duration,
    backoff: RetryConfig,
}

impl EndpointAdvertiser {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        state: SharedState,
        self_entry: HostEntry,
        threshold: usize,
        tick: Duration,
    ) -> Self {
        let tick_ms = tick.as_millis() as u64;
        Self {
            discovery,
            state,
            self_entry,
            threshold,
            tick,
            startup_delay: Duration::ZERO,
            backoff: RetryConfig::with_delays(0, tick_ms, tick_ms.saturating_mul(30))
                .with_jitter(BACKOFF_JITTER),
        }
    }

    /// Build an advertiser from server configuration
    pub fn from_config(
        config: &ServerConfig,
        discovery: Arc<dyn Discovery>,
        state: SharedState,
    ) -> Self {
        let entry = HostEntry::new(
            config.self_ip.clone(),
            config.advertised_port,
            HostTags::from(&config.placement),
        );

        Self::new(discovery, state, entry, config.threshold, config.tick_interval())
            .with_startup_delay(config.startup_delay())
            .with_max_backoff(config.max_backoff())
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.backoff.max_delay_ms = (max.as_millis() as u64).max(self.backoff.base_delay_ms);
        self
    }

    pub fn self_entry(&self) -> &HostEntry {
        &self.self_entry
    }

    /// Delay before the next tick after `consecutive_failures` failed ticks
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.tick;
        }
        self.backoff.jittered_delay(consecutive_failures + 1)
    }

    /// Log level for a failed tick
    ///
    /// Transient failures are expected while discovery restarts; a rejected
    /// request will keep failing until someone fixes the resource.
    pub fn failure_level(error: &DiscoveryError) -> tracing::Level {
        if error.is_recoverable() {
            tracing::Level::WARN
        } else {
            tracing::Level::ERROR
        }
    }

    /// Run one tick: sample the registry and register or deregister
    pub async fn reconcile(&self) -> Result<Reconcile, DiscoveryError> {
        let active = self.state.connections.active();
        tracing::info!(
            connections = active,
            pod_ip = %self.self_entry.ip_address,
            "Number of connections to the server"
        );

        self.apply(Desired::for_load(active, self.threshold)).await
    }

    /// Withdraw the advertisement if one is recorded
    pub async fn withdraw(&self) -> Result<Reconcile, DiscoveryError> {
        self.apply(Desired::Deregistered).await
    }

    async fn apply(&self, desired: Desired) -> Result<Reconcile, DiscoveryError> {
        let mut transition = self.state.registration.lock().await;

        match (desired, transition.is_registered()) {
            (Desired::Registered, true) | (Desired::Deregistered, false) => {
                Ok(Reconcile::Unchanged(desired))
            }
            (Desired::Registered, false) => {
                let started = Instant::now();
                let result = self.discovery.register(&self.self_entry).await;
                metrics::record_discovery_call(
                    "register",
                    result.is_ok(),
                    started.elapsed().as_secs_f64(),
                );
                result?;
                transition.set_registered(true);
                Ok(Reconcile::Registered)
            }
            (Desired::Deregistered, true) => {
                let started = Instant::now();
                let result = self.discovery.deregister(&self.self_entry.ip_address).await;
                metrics::record_discovery_call(
                    "deregister",
                    result.is_ok(),
                    started.elapsed().as_secs_f64(),
                );
                result?;
                transition.set_registered(false);
                Ok(Reconcile::Deregistered)
            }
        }
    }

    /// Tick until shutdown, then withdraw once
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            threshold = self.threshold,
            tick_ms = self.tick.as_millis() as u64,
            "Endpoint advertiser started"
        );

        let mut delay = self.startup_delay;
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            match self.reconcile().await {
                Ok(Reconcile::Unchanged(_)) => {
                    consecutive_failures = 0;
                }
                Ok(change) => {
                    consecutive_failures = 0;
                    tracing::info!(?change, "Registration state changed");
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if Self::failure_level(&e) == tracing::Level::ERROR {
                        tracing::error!(
                            error = %e,
                            consecutive_failures,
                            "Discovery rejected the request, retrying on next tick"
                        );
                    } else {
                        tracing::warn!(
                            error = %e,
                            consecutive_failures,
                            "Discovery call failed, retrying on next tick"
                        );
                    }
                }
            }

            delay = self.next_delay(consecutive_failures);
        }

        match self.withdraw().await {
            Ok(Reconcile::Deregistered) => tracing::info!("Withdrew discovery entry on shutdown"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to withdraw discovery entry on shutdown"),
        }
        tracing::info!("Endpoint advertiser stopped");
    }
}
