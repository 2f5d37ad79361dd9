//! Server process: gRPC listener, endpoint advertiser and admin surface
//!
//! One [`MaxServer`] owns the process-wide [`SharedState`], serves the
//! `math.Math` service, and runs exactly one [`EndpointAdvertiser`] next to
//! it. Shutdown is broadcast on a `watch` channel: live streams end with
//! `unavailable`, the advertiser withdraws, the admin server stops.

pub mod admin;

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;

use crate::config::{ConfigError, ServerConfig};
use crate::discovery::{Discovery, DiscoveryClient, EndpointAdvertiser};
use crate::metrics;
use crate::proto::MathServer;
use crate::state::{self, SharedState};
use crate::stream::MaxService;

use admin::AdminState;

// ============================================================================
// Server
// ============================================================================

/// Streaming server with connection-gated discovery registration
pub struct MaxServer {
    config: ServerConfig,
    state: SharedState,
    discovery: Arc<dyn Discovery>,
}

impl MaxServer {
    /// Create a server that registers through the configured discovery URL
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let discovery = DiscoveryClient::new(config.discovery_url.clone(), config.mutation_timeout())
            .map_err(|e| ServerError::Init(e.to_string()))?;

        Ok(Self::with_discovery(config, Arc::new(discovery)))
    }

    /// Create a server with a custom discovery backend
    pub fn with_discovery(config: ServerConfig, discovery: Arc<dyn Discovery>) -> Self {
        Self {
            config,
            state: SharedState::new(),
            discovery,
        }
    }

    /// Shared state handle (connection registry and registration state)
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured port and serve until `shutdown_signal` resolves
    pub async fn run(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;

        self.serve_with_listener(listener, shutdown_signal).await
    }

    /// Serve on an already bound listener until `shutdown_signal` resolves
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        if let Err(e) = metrics::init_metrics() {
            tracing::warn!(error = %e, "Failed to initialize metrics, continuing without them");
        }

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let advertiser =
            EndpointAdvertiser::from_config(&self.config, Arc::clone(&self.discovery), self.state());
        let advertiser_task = tokio::spawn(advertiser.run(shutdown_rx.clone()));

        let admin_task = self.config.admin_addr.map(|addr| {
            let state = AdminState::new(self.state());
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = admin::serve(addr, state, until_shutdown(rx)).await {
                    tracing::error!(error = %e, "Admin server failed");
                }
            })
        });

        tracing::info!(
            addr = %local_addr,
            self_ip = %self.config.self_ip,
            threshold = self.config.threshold,
            "Listening for math.Math streams"
        );

        let service = MaxService::new(self.state(), shutdown_rx.clone());
        let serve = tonic::transport::Server::builder()
            .add_service(MathServer::new(service))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                until_shutdown(shutdown_rx.clone()),
            );

        tokio::pin!(serve);
        tokio::pin!(shutdown_signal);

        let result = tokio::select! {
            result = &mut serve => result,
            _ = &mut shutdown_signal => {
                tracing::info!("Shutdown requested, draining connections");
                let _ = shutdown_tx.send(true);
                serve.await
            }
        };

        let _ = shutdown_tx.send(true);
        if let Err(e) = advertiser_task.await {
            tracing::error!(error = %e, "Advertiser task panicked");
        }
        if let Some(task) = admin_task {
            let _ = task.await;
        }

        result.map_err(|e| ServerError::Serve(e.to_string()))?;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn until_shutdown(mut shutdown: watch::Receiver<bool>) {
    state::shutdown_signalled(&mut shutdown).await
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Failed to bind to address
    #[error("Failed to bind: {0}")]
    Bind(String),

    /// Serving failed
    #[error("Server error: {0}")]
    Serve(String),
}
