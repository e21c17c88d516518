//! The HTTP layer underneath the dispatcher.
//!
//! The dispatcher only needs to turn a [`PreparedRequest`] into a
//! [`Response`]. [`ReqwestTransport`] does that with `reqwest`; tests and
//! embedders can plug in their own [`Transport`].

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, header};
use log::trace;
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use url::Url;

use crate::{Body, ErrorKind, Response, Result};

/// A request whose route has been resolved and whose headers are final.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method
    pub method: Method,
    /// Concrete URL, including the base URL
    pub url: Url,
    /// Default headers merged with the request's own headers
    pub headers: HeaderMap,
    /// Optional payload
    pub body: Option<Body>,
}

/// Failure to obtain any response at all
#[derive(Debug, Error)]
pub enum TransportError {
    /// The `reqwest` transport failed: connection refused, timeout, ...
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A custom transport failed
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Returns `true` if the request timed out
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout(),
            Self::Custom(_) => false,
        }
    }
}

/// Sends prepared requests and returns the raw outcome.
///
/// Implementations must support any number of concurrent calls.
/// Rate limiting is handled by the caller, so a transport never retries.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send one request and return its status, headers and body
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<Response, TransportError>;
}

/// The default [`Transport`], backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the `reqwest` client cannot be created.
    /// See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .timeout(timeout)
            .build()
            .map_err(ErrorKind::BuildRequestClient)?;
        Ok(Self { client })
    }
}

impl From<reqwest::Client> for ReqwestTransport {
    fn from(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &PreparedRequest) -> std::result::Result<Response, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        builder = match &request.body {
            None => builder,
            Some(Body::Json(json)) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(json.clone()),
            Some(Body::Multipart { fields, files }) => {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                for (index, file) in files.iter().enumerate() {
                    let part = Part::bytes(file.content.clone()).file_name(file.file_name.clone());
                    form = form.part(format!("file{}", index + 1), part);
                }
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        trace!("Received {status} from {}: {body}", request.url);

        Ok(Response::new(status, headers, body))
    }
}
