#![allow(clippy::module_inception)]

mod bucket;
mod key;
mod probe;

pub use bucket::{Bucket, InUse};
pub use key::{BucketId, HashKey, Scope};
pub(crate) use probe::ProbeTicket;
