//! Endpoint advertisement through an EDS-style discovery resource
//!
//! The server advertises itself to the load balancer by keeping its own
//! entry in a shared JSON host list while it has spare capacity, and removes
//! the entry once it is busy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  tick   ┌──────────────────────┐  GET/POST/PUT  ┌──────────────┐
//! │ ConnectionRegistry   │───────▶│ EndpointAdvertiser   │──────────────▶│ discovery    │
//! │ (active connections) │  read   │ n < threshold ?      │ DiscoveryClient│ host list    │
//! └──────────────────────┘         │  register : withdraw │                └──────────────┘
//!                                  └──────────────────────┘
//! ```

pub mod advertiser;
pub mod client;
pub mod hosts;

use async_trait::async_trait;
use thiserror::Error;

pub use advertiser::{Desired, EndpointAdvertiser, Reconcile};
pub use client::{DeregisterOutcome, DiscoveryClient, RegisterOutcome};
pub use hosts::{HostEntry, HostList, HostTags};

/// Register/deregister operations the advertiser drives
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Add `entry` to the advertised host list
    async fn register(&self, entry: &HostEntry) -> Result<(), DiscoveryError>;

    /// Remove every entry for `ip_address` from the advertised host list
    async fn deregister(&self, ip_address: &str) -> Result<(), DiscoveryError>;
}

/// Errors talking to the discovery resource
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Connection, timeout or other transport failure
    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// Status other than the ones the protocol expects
    #[error("{method} returned unexpected status {status}")]
    UnexpectedStatus { method: &'static str, status: u16 },

    /// Host list body could not be decoded
    #[error("failed to decode host list: {0}")]
    Decode(#[source] reqwest::Error),

    /// Host list could not be encoded
    #[error("failed to encode host list: {0}")]
    Encode(#[source] serde_json::Error),
}

impl DiscoveryError {
    /// Whether the next tick may reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Encode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_recoverability() {
        let err = DiscoveryError::UnexpectedStatus {
            method: "PUT",
            status: 503,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "PUT returned unexpected status 503");

        let err = DiscoveryError::UnexpectedStatus {
            method: "GET",
            status: 403,
        };
        assert!(!err.is_recoverable());
    }
}
