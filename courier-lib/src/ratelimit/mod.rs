//! Bucket based rate limiting.
//!
//! The server groups routes into *buckets* and reports each bucket's limits
//! through response headers. This module learns those limits and throttles
//! requests locally so they stay within them.
//!
//! # Architecture
//!
//! - [`HashKey`]: Identifies a route family (method plus route template)
//! - [`Bucket`]: Limits and window state of one server-side bucket
//! - [`Registry`]: Maps route families to hashes and hashes to buckets
//! - [`RateLimitConfig`]: Timing knobs shared by all buckets
//!
//! A fresh bucket knows nothing about its limits. The first request routed
//! to it acts as the *probe*: it is sent alone, and its siblings wait until
//! its response has populated the bucket. After that, every request takes one
//! unit from the bucket's budget and waits for the next window when none is
//! left. A global 429 closes a gate in front of all buckets.

mod bucket;
mod config;
mod gate;
pub(crate) mod headers;
mod reclaimer;
mod registry;

pub(crate) use bucket::ProbeTicket;
pub use bucket::{Bucket, BucketId, HashKey, InUse, Scope};
pub use config::{RateLimitConfig, RetryAfterPrecision};
pub(crate) use gate::GlobalGate;
pub(crate) use reclaimer::Reclaimer;
pub use registry::Registry;
