//! Rate limiting.
//!
//! A pure fixed-window policy with 429 cool-down, shared by the reply worker
//! (publish throughput) and the inbound slow-down middleware.

pub mod limiter;
pub mod middleware;

pub use limiter::*;
pub use middleware::{slow_down, SlowDown};
