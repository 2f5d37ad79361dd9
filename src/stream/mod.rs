//! Streaming running-maximum service
//!
//! Each `Max` call is one connection: the handler counts it in the shared
//! [`ConnectionRegistry`](crate::state::ConnectionRegistry), feeds incoming
//! numbers through a [`MaxAggregator`], and streams back every new maximum.
//!
//! ```text
//! client ──Request{num}──▶ run_connection ──Response{result}──▶ client
//!                               │
//!                     ConnectionGuard (+1 on open, -1 on any exit)
//! ```

pub mod aggregator;
pub mod service;

pub use aggregator::{MaxAggregator, Phase};
pub use service::{run_connection, ConnectionOutcome, MaxService};
