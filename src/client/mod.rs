//! Client driver for the `math.Math/Max` stream
//!
//! Opens one stream, sends a paced sequence of random observations whose
//! range widens with each step, and drains the max updates the server sends
//! back on the same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::Channel;

use crate::config::DriverConfig;
use crate::proto::{self, MathClient};
use crate::utils::retry::{with_retry, RetryConfig};

// ============================================================================
// Errors
// ============================================================================

/// Errors from the client driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// Could not establish the channel
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Server ended the stream with a status
    #[error("stream failed: {0}")]
    Stream(#[from] tonic::Status),
}

impl DriverError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Stream(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
        }
    }
}

// ============================================================================
// Observation Source
// ============================================================================

/// Random observations where step `i` is drawn from `[0, i)`
#[derive(Debug)]
pub struct ObservationSource {
    rng: StdRng,
}

impl ObservationSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Value for 1-based step `step`
    pub fn value_at(&mut self, step: u64) -> i32 {
        let bound = step.clamp(1, i32::MAX as u64) as i32;
        self.rng.gen_range(0..bound)
    }
}

impl Default for ObservationSource {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Summary of one driver run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Observations handed to the transport
    pub sent: u64,

    /// Max updates received
    pub updates: u64,

    /// Last (largest) max received
    pub max: Option<i32>,
}

/// Drives one `Max` stream against a server
pub struct ClientDriver {
    config: DriverConfig,
    source: Option<ObservationSource>,
    connect_retry: RetryConfig,
}

impl ClientDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            source: None,
            connect_retry: RetryConfig::with_delays(3, 500, 5000).with_jitter(0.1),
        }
    }

    /// Use a specific observation source instead of an entropy-seeded one
    pub fn with_source(mut self, source: ObservationSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Run until the server closes the stream
    pub async fn run(self) -> Result<DriverReport, DriverError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the server closes the stream or `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<DriverReport, DriverError>
    where
        F: Future<Output = ()>,
    {
        let (min_wait, max_wait) = self.config.connect_jitter_ms;
        if max_wait > 0 {
            let wait = rand::thread_rng().gen_range(min_wait..=max_wait);
            tracing::debug!(wait_ms = wait, "Waiting before dialing");
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }

        let mut client = self.connect().await?;

        let sent = Arc::new(AtomicU64::new(0));
        let outbound = observations(
            self.source.unwrap_or_default(),
            self.config.observations,
            self.config.pace(),
            Arc::clone(&sent),
        );

        let mut inbound = client.max(outbound).await?.into_inner();
        let mut report = DriverReport::default();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Driver interrupted");
                    break;
                }
                message = inbound.message() => match message? {
                    Some(update) => {
                        if report.max.is_some_and(|m| update.result <= m) {
                            tracing::warn!(
                                previous = report.max,
                                received = update.result,
                                "Received non-increasing max"
                            );
                        }
                        report.updates += 1;
                        report.max = Some(update.result);
                        tracing::info!(max = update.result, "new max received");
                    }
                    None => {
                        tracing::info!("Server closed the stream");
                        break;
                    }
                },
            }
        }

        report.sent = sent.load(Ordering::SeqCst);
        tracing::info!(
            sent = report.sent,
            updates = report.updates,
            max = report.max,
            "Driver finished"
        );
        Ok(report)
    }

    async fn connect(&self) -> Result<MathClient<Channel>, DriverError> {
        let endpoint = self.config.endpoint();
        tracing::info!(endpoint = %endpoint, "Connecting");

        with_retry(&self.connect_retry, || MathClient::connect(endpoint.clone()))
            .await
            .map_err(|e| DriverError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })
    }
}

/// Paced outbound stream of `count` observations
fn observations(
    mut source: ObservationSource,
    count: u64,
    pace: Duration,
    sent: Arc<AtomicU64>,
) -> impl futures::Stream<Item = proto::Request> + Send + 'static {
    async_stream::stream! {
        for step in 1..=count {
            let num = source.value_at(step);
            tracing::debug!(num, "sending");
            yield proto::Request::observation(num);
            sent.fetch_add(1, Ordering::SeqCst);

            if !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }
        }
        tracing::debug!("All observations sent, closing send half");
    }
}
