use std::fmt::{self, Display};

use http::{HeaderMap, Method, StatusCode};
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

use crate::{Response, TransportError};

/// Context kept for a request that the server rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRequest {
    /// Method of the rejected request
    pub method: Method,
    /// Concrete URL of the rejected request
    pub url: Url,
    /// The server's answer
    pub response: Response,
}

impl FailedRequest {
    /// Status code of the rejection
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Headers of the rejection
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Body of the rejection, usually a JSON error object
    #[must_use]
    pub fn body(&self) -> &str {
        &self.response.body
    }
}

impl Display for FailedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.url, self.response)
    }
}

/// Possible errors when submitting requests through `courier_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request never produced a response: connection failure, timeout, ...
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server rejected the request as malformed (400 or 405)
    #[error("Malformed request: {0}")]
    MalformedRequest(Box<FailedRequest>),

    /// The credentials are missing, invalid or lack permissions (401 or 403)
    #[error("Unauthorized: {0}")]
    Unauthorized(Box<FailedRequest>),

    /// The requested resource does not exist (404)
    #[error("Not found: {0}")]
    NotFound(Box<FailedRequest>),

    /// The request body exceeds the server's size limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(Box<FailedRequest>),

    /// A 429 that could not be retried because it carried no usable `Retry-After`
    #[error("Rate limited: {0}")]
    RateLimited(Box<FailedRequest>),

    /// The server failed to handle the request (500)
    #[error("Server error: {0}")]
    ServerError(Box<FailedRequest>),

    /// Any other non-success status code
    #[error("Unexpected status: {0}")]
    UnknownStatus(Box<FailedRequest>),

    /// A placeholder in the route template has no matching parameter
    #[error("Route `{route}` requires parameter `{parameter}`")]
    MissingRouteParameter {
        /// The route template
        route: String,
        /// The placeholder without a value
        parameter: String,
    },

    /// Base URL and route do not form a valid URL
    #[error("Cannot build a URL from `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),

    /// A header value could not be parsed.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The default transport's `reqwest` client could not be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),
}

impl ErrorKind {
    /// Classify a response by its status code.
    ///
    /// Returns `None` for success codes and for 429, which callers never see
    /// as long as it can be retried.
    #[must_use]
    pub(crate) fn from_response(method: &Method, url: &Url, response: &Response) -> Option<Self> {
        let status = response.status;
        if status.is_success() || status == StatusCode::TOO_MANY_REQUESTS {
            return None;
        }

        let failed = Box::new(FailedRequest {
            method: method.clone(),
            url: url.clone(),
            response: response.clone(),
        });

        Some(match status.as_u16() {
            400 | 405 => Self::MalformedRequest(failed),
            401 | 403 => Self::Unauthorized(failed),
            404 => Self::NotFound(failed),
            413 => Self::PayloadTooLarge(failed),
            500 => Self::ServerError(failed),
            _ => Self::UnknownStatus(failed),
        })
    }

    /// The rejected exchange, if the server answered at all
    #[must_use]
    pub fn failed_request(&self) -> Option<&FailedRequest> {
        match self {
            Self::MalformedRequest(failed)
            | Self::Unauthorized(failed)
            | Self::NotFound(failed)
            | Self::PayloadTooLarge(failed)
            | Self::RateLimited(failed)
            | Self::ServerError(failed)
            | Self::UnknownStatus(failed) => Some(failed),
            _ => None,
        }
    }

    /// HTTP status code of the rejection, if any
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.failed_request().map(FailedRequest::status)
    }

    /// Returns `true` if the request failed before a response was received
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
