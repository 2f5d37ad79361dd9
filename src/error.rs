//! Unified error handling for the maxstream crate
//!
//! Each subsystem owns a focused error type ([`DiscoveryError`],
//! [`ServerError`], [`DriverError`], [`ConfigError`]). The crate-level
//! [`Error`] wraps them so that binaries and cross-module code can use a
//! single `Result` alias while still classifying failures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use maxstream::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "retrying on next tick");
//!     } else {
//!         tracing::error!(error = %err, "giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::client::DriverError;
pub use crate::config::ConfigError;
pub use crate::discovery::DiscoveryError;
pub use crate::server::ServerError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Streaming transport errors (gRPC receive/send, connect)
    Transport,
    /// Discovery resource errors (HTTP, status, payload)
    Discovery,
    /// Configuration and validation errors
    Config,
    /// Listener and serving errors
    Server,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in log fields and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Discovery => "discovery",
            Self::Config => "config",
            Self::Server => "server",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the maxstream crate
#[derive(Error, Debug)]
pub enum Error {
    /// Discovery resource errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Server startup and serving errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Client driver errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// gRPC status returned by a peer
    #[error("gRPC status: {0}")]
    Status(#[from] tonic::Status),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Discovery(e) => e.is_recoverable(),
            Self::Server(_) => false,
            Self::Driver(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Status(s) => matches!(
                s.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Aborted
            ),
            Self::Io(_) => true,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Server(_) => ErrorCategory::Server,
            Self::Driver(_) | Self::Status(_) | Self::Io(_) => ErrorCategory::Transport,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
