//! Wire types for the `math.Math` streaming service
//!
//! `math.rs` is generated from `proto/math.proto` with `tonic-build` and
//! checked in, so building the crate does not require `protoc`.

#[allow(clippy::all)]
mod math {
    include!("math.rs");
}

pub use math::math_client::MathClient;
pub use math::math_server::{Math, MathServer};
pub use math::{Request, Response};

impl Request {
    /// Build an observation message
    pub fn observation(num: i32) -> Self {
        Self { num }
    }
}

impl Response {
    /// Build a max-update message
    pub fn max_update(result: i32) -> Self {
        Self { result }
    }
}
