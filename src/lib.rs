//! maxstream - streaming running-maximum service
//!
//! A gRPC bidirectional stream that answers every new running maximum, and
//! an advertiser that keeps the instance listed in an EDS-style discovery
//! resource only while it has spare connection capacity.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`stream`] - The `math.Math/Max` handler and per-connection aggregator
//! - [`state`] - Connection registry and registration state shared process-wide
//! - [`discovery`] - Discovery host list client and the endpoint advertiser
//! - [`server`] - Server process wiring and the admin HTTP surface
//! - [`client`] - Client driver that exercises the stream
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`proto`] - Wire types for the gRPC service
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use maxstream::config::ServerConfig;
//! use maxstream::server::MaxServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let server = MaxServer::new(config)?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod proto;
pub mod server;
pub mod state;
pub mod stream;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ClientDriver, DriverReport};
    pub use crate::config::{DriverConfig, ServerConfig};
    pub use crate::discovery::{Discovery, DiscoveryClient, EndpointAdvertiser, HostEntry, HostList};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::server::MaxServer;
    pub use crate::state::SharedState;
    pub use crate::stream::{MaxAggregator, MaxService};
}
