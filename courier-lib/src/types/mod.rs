#![allow(unreachable_pub)]

mod error;
mod request;
mod response;

pub use error::{ErrorKind, FailedRequest};
pub use request::{Attachment, Body, Request, RouteParams};
pub use response::Response;

/// The courier `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
