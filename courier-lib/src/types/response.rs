use std::fmt::Display;

use http::{HeaderMap, StatusCode};
use serde::Serialize;

/// The raw outcome of an HTTP exchange: status code, headers and body.
///
/// This is what a [`Transport`](crate::Transport) hands back, and what
/// [`Client::execute`](crate::Client::execute) resolves to on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// HTTP status code returned by the server
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    /// Response headers
    #[serde(skip)]
    pub headers: HeaderMap,
    /// Response body, decoded as UTF-8
    pub body: String,
}

impl Response {
    /// Create a new response
    #[inline]
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: String) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns `true` if the status code is in the 2xx range
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Look up a header and return it as a string slice, if it is valid UTF-8
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown status")
        )
    }
}

fn serialize_status<S>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u16(status.as_u16())
}
