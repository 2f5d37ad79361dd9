//! gRPC handler for the `math.Math/Max` bidirectional stream

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};

use crate::metrics;
use crate::proto;
use crate::state::{shutdown_signalled, ConnectionGuard, SharedState};

use super::aggregator::MaxAggregator;

/// Buffered updates per connection before the handler waits on the client
const OUTBOUND_CAPACITY: usize = 16;

// ============================================================================
// Connection Outcome
// ============================================================================

/// How a streaming connection ended
#[derive(Debug, Clone)]
pub enum ConnectionOutcome {
    /// Client closed its send half
    Completed,

    /// Client went away (response stream dropped)
    Cancelled,

    /// Server is shutting down
    Shutdown,

    /// Receive failed at the transport level
    Failed(Status),
}

impl ConnectionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Shutdown => "shutdown",
            Self::Failed(_) => "failed",
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Implementation of the `math.Math` service
#[derive(Debug, Clone)]
pub struct MaxService {
    state: SharedState,
    shutdown: watch::Receiver<bool>,
}

impl MaxService {
    pub fn new(state: SharedState, shutdown: watch::Receiver<bool>) -> Self {
        Self { state, shutdown }
    }
}

#[tonic::async_trait]
impl proto::Math for MaxService {
    type MaxStream = ReceiverStream<Result<proto::Response, Status>>;

    async fn max(
        &self,
        request: Request<Streaming<proto::Request>>,
    ) -> Result<Response<Self::MaxStream>, Status> {
        let peer = request
            .remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let inbound = request.into_inner();

        let guard = self.state.connections.acquire();
        tracing::info!(peer = %peer, active = guard.active(), "Connection opened");

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let shutdown = self.shutdown.clone();
        let registry = self.state.connections.clone();

        tokio::spawn(async move {
            let outcome = run_connection(inbound, tx, guard, shutdown).await;
            match &outcome {
                ConnectionOutcome::Failed(status) => {
                    tracing::warn!(peer = %peer, error = %status, "receive error, closing connection");
                }
                other => {
                    tracing::info!(peer = %peer, outcome = other.label(), "Connection closed");
                }
            }
            tracing::debug!(active = registry.active(), "Connections after close");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Drive one connection until the client finishes, leaves, errors, or the
/// server shuts down
///
/// `guard` keeps the connection counted; it is released when this future
/// completes or is dropped, whichever exit path is taken.
pub async fn run_connection<S>(
    inbound: S,
    tx: mpsc::Sender<Result<proto::Response, Status>>,
    guard: ConnectionGuard,
    mut shutdown: watch::Receiver<bool>,
) -> ConnectionOutcome
where
    S: Stream<Item = Result<proto::Request, Status>>,
{
    tokio::pin!(inbound);
    let _guard = guard;
    let mut aggregator = MaxAggregator::new();

    let outcome = loop {
        tokio::select! {
            biased;

            _ = shutdown_signalled(&mut shutdown) => {
                aggregator.drain();
                let _ = tx.try_send(Err(Status::unavailable("server shutting down")));
                break ConnectionOutcome::Shutdown;
            }

            _ = tx.closed() => {
                aggregator.drain();
                break ConnectionOutcome::Cancelled;
            }

            message = inbound.next() => match message {
                None => {
                    aggregator.drain();
                    break ConnectionOutcome::Completed;
                }
                Some(Err(status)) => {
                    aggregator.drain();
                    break ConnectionOutcome::Failed(status);
                }
                Some(Ok(request)) => {
                    metrics::record_observation();
                    let Some(max) = aggregator.observe(request.num) else {
                        continue;
                    };

                    // A client that stops reading must not hold up shutdown
                    tokio::select! {
                        biased;

                        _ = shutdown_signalled(&mut shutdown) => {
                            aggregator.drain();
                            let _ = tx.try_send(Err(Status::unavailable("server shutting down")));
                            break ConnectionOutcome::Shutdown;
                        }

                        sent = tx.send(Ok(proto::Response::max_update(max))) => {
                            if sent.is_err() {
                                aggregator.drain();
                                break ConnectionOutcome::Cancelled;
                            }
                        }
                    }
                    metrics::record_max_update();
                    tracing::debug!(max, "send new max");
                }
            }
        }
    };

    aggregator.close();
    metrics::record_connection_closed(outcome.label());
    outcome
}
