//! `courier` is a library for talking to a bucket rate limited HTTP API.
//!
//! Every request is charged to a server-defined *bucket*. The client learns
//! each bucket's limits from response headers, holds requests back before
//! they would exceed them, and transparently retries the 429s that slip
//! through anyway.
//!
//! ```no_run
//! use courier_lib::{ClientBuilder, Result, RouteParams};
//! use http::{HeaderMap, Method};
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::builder()
//!       .token(SecretString::from("my-bot-token"))
//!       .build()
//!       .client()?;
//!
//!   let params = RouteParams::new().with("channel_id", 81_384_788_765_712_384_u64);
//!   let response = client
//!       .submit(Method::GET, "/channels/:channel_id/messages", params, HeaderMap::new(), None)
//!       .await?;
//!   println!("{response}");
//!   Ok(())
//! }
//! ```
//!
//! Requests can also be assembled with the [`Request`] builder and passed to
//! [`Client::execute`].

#[cfg(doctest)]
doc_comment::doctest!("../../README.md");

mod client;
mod transport;
mod types;

pub mod ratelimit;
pub mod route;

pub use client::{
    Client, ClientBuilder, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
    ResolvedRoute, TokenType,
};
pub use transport::{PreparedRequest, ReqwestTransport, Transport, TransportError};
pub use types::*;
