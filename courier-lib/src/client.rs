//! Dispatcher of API requests.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` resolves requests to their rate limit buckets, throttles them and
//! returns classified responses. `ClientBuilder` exposes a finer level of
//! granularity for building a `Client`.
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use log::{debug, error, trace, warn};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};
use tokio::time::sleep;
use typed_builder::TypedBuilder;
use url::Url;

use crate::ratelimit::headers::{self as limit_headers, RateLimitHeaders};
use crate::ratelimit::{
    Bucket, BucketId, GlobalGate, HashKey, InUse, ProbeTicket, RateLimitConfig, Reclaimer,
    Registry, RetryAfterPrecision, Scope,
};
use crate::transport::{PreparedRequest, ReqwestTransport, Transport};
use crate::{Body, ErrorKind, FailedRequest, Request, Response, Result, RouteParams, route};

/// Default API base URL, `https://discord.com/api/v10`.
pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
/// Default timeout in seconds before a request is deemed as failed, 100.
pub const DEFAULT_TIMEOUT_SECS: u64 = 100;
/// Default user agent, `courier/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// A blocked request whose reset lies further in the past than this is
/// looking at broken bucket state.
const OVERDUE_RESET_LIMIT: Duration = Duration::from_secs(60);

/// Prefix of the `Authorization` header
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum TokenType {
    /// Bot tokens, sent as `Authorization: Bot <token>`
    #[default]
    Bot,
    /// OAuth2 access tokens, sent as `Authorization: Bearer <token>`
    Bearer,
}

/// Builder for [`Client`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `ClientBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `ClientBuilder`.
"))]
pub struct ClientBuilder {
    /// Base URL every route is appended to.
    #[builder(default_code = "String::from(DEFAULT_BASE_URL)")]
    base_url: String,

    /// Response timeout per request.
    ///
    /// Only used by the default transport.
    #[builder(default = Duration::from_secs(DEFAULT_TIMEOUT_SECS))]
    timeout: Duration,

    /// User-agent used for all requests.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,

    /// Token sent in the `Authorization` header.
    token: Option<SecretString>,

    /// Kind of [`ClientBuilder::token`].
    token_type: TokenType,

    /// Custom request headers sent with every request.
    ///
    /// Headers given to a single request take precedence.
    custom_headers: HeaderMap,

    /// Rate limiting configuration
    ratelimit: RateLimitConfig,

    /// Replaces the `reqwest` based transport.
    #[builder(setter(!into, strip_option))]
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The base URL is invalid.
    /// - The user-agent or the token are not valid header values.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn client(self) -> Result<Client> {
        let Self {
            base_url,
            timeout,
            user_agent,
            token,
            token_type,
            custom_headers: mut headers,
            ratelimit,
            transport,
        } = self;

        Url::parse(&base_url).map_err(|e| ErrorKind::InvalidUrl(base_url.clone(), e))?;

        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&user_agent).map_err(ErrorKind::InvalidHeader)?,
        );

        if let Some(token) = token
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|token| !token.is_empty())
        {
            let mut value = HeaderValue::from_str(&format!("{token_type} {token}"))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        if ratelimit.retry_after_precision == RetryAfterPrecision::Milliseconds {
            headers.insert(
                limit_headers::PRECISION,
                HeaderValue::from_static("millisecond"),
            );
        }

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(timeout)?),
        };

        Ok(Client {
            inner: Arc::new(Inner {
                base_url: base_url.trim_end_matches('/').to_string(),
                default_headers: headers,
                transport,
                config: ratelimit,
                registry: Arc::new(Registry::new()),
                gate: GlobalGate::new(),
                reclaimer: Reclaimer::default(),
            }),
        })
    }
}

/// A request resolved to its URL and rate limit bucket.
///
/// The bucket counts as in use until this value is dropped or dispatched.
#[derive(Debug)]
pub struct ResolvedRoute {
    /// Concrete URL of the request
    pub url: Url,
    /// Route family used for hash lookups
    pub key: HashKey,
    /// The bucket the request is charged to
    pub bucket: Arc<Bucket>,
    in_use: InUse,
}

/// Submits requests while honoring the server's rate limits.
///
/// Cloning is cheap; all clones share the same buckets and global gate.
///
/// See [`ClientBuilder`] which contains sane defaults for all configuration options.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Base URL without trailing slash
    base_url: String,
    /// Headers sent with every request
    default_headers: HeaderMap,
    transport: Arc<dyn Transport>,
    config: RateLimitConfig,
    registry: Arc<Registry>,
    gate: GlobalGate,
    reclaimer: Reclaimer,
}

impl Client {
    /// Submit a request and wait for its classified outcome.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn submit(
        &self,
        method: Method,
        route: impl Into<String>,
        params: RouteParams,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response> {
        self.execute(Request {
            method,
            route: route.into(),
            params,
            headers,
            body,
        })
        .await
    }

    /// Execute a request.
    ///
    /// The request waits for the global gate, for the probe of its bucket and
    /// for its bucket's budget as needed. 429 responses are retried
    /// transparently as long as they carry a `Retry-After` header.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The route has a placeholder without a parameter.
    /// - No response could be obtained.
    /// - The server answered with a non-success status.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let Request {
            method,
            route,
            params,
            headers,
            body,
        } = request;

        let resolved = self.resolve(&method, &route, &params)?;

        let mut merged = self.inner.default_headers.clone();
        merged.extend(headers);

        if let Some(body) = &body {
            trace!("Request body for {method} {}: {}", resolved.url, body.describe());
        }

        let prepared = PreparedRequest {
            method,
            url: resolved.url.clone(),
            headers: merged,
            body,
        };
        self.dispatch(resolved, &prepared).await
    }

    /// Compile the route and find or create its bucket.
    ///
    /// Also starts the bucket reclaimer if it is not running.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if a placeholder has no parameter or the resulting URL
    /// is invalid.
    pub fn resolve(
        &self,
        method: &Method,
        route: &str,
        params: &RouteParams,
    ) -> Result<ResolvedRoute> {
        let compiled = route::compile(route, params)?;
        let url = self.url(&compiled.path)?;
        let key = HashKey::new(method, route);

        let (bucket, in_use) = self.inner.registry.resolve(&key, &compiled.scope);
        self.inner
            .reclaimer
            .ensure_running(&self.inner.registry, self.inner.config);

        Ok(ResolvedRoute {
            url,
            key,
            bucket,
            in_use,
        })
    }

    /// Number of live buckets
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Look up the live bucket a request would be charged to, without creating it
    #[must_use]
    pub fn bucket(&self, method: &Method, route: &str, params: &RouteParams) -> Option<Arc<Bucket>> {
        let hash = self.route_hash(method, route)?;
        let id = BucketId::new(&hash, &Scope::from_params(params));
        self.inner.registry.bucket(&id)
    }

    /// The bucket hash currently recorded for a route family
    #[must_use]
    pub fn route_hash(&self, method: &Method, route: &str) -> Option<String> {
        self.inner.registry.route_hash(&HashKey::new(method, route))
    }

    /// Whether the bucket reclaimer is currently running
    #[must_use]
    pub fn is_reclaimer_running(&self) -> bool {
        self.inner.reclaimer.is_running()
    }

    /// The rate limiting configuration of this client
    #[must_use]
    pub fn ratelimit_config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    fn url(&self, path: &str) -> Result<Url> {
        let url = format!("{}{path}", self.inner.base_url);
        Url::parse(&url).map_err(|e| ErrorKind::InvalidUrl(url, e))
    }

    /// The per-request loop: gate, probe or throttle, send, update, retry.
    async fn dispatch(&self, resolved: ResolvedRoute, request: &PreparedRequest) -> Result<Response> {
        let ResolvedRoute {
            key,
            bucket,
            in_use,
            ..
        } = resolved;
        let config = &self.inner.config;
        let mut in_use = Some(in_use);
        let mut probe: Option<ProbeTicket> = None;

        loop {
            self.inner.gate.wait_open().await;

            if probe.is_none() {
                probe = bucket.await_limits().await;
            }

            if probe.is_some() {
                debug!("Request for {bucket} allowed, probing limits");
            } else {
                let now = Instant::now();
                bucket.try_reset(now);
                let remaining = bucket.acquire();
                if remaining < 0 {
                    let deadline = bucket.reset_deadline(config.use_relative_ratelimit);
                    match deadline {
                        Some(deadline)
                            if now.saturating_duration_since(deadline) > OVERDUE_RESET_LIMIT =>
                        {
                            error!(
                                "Bucket {bucket} reset {:?} ago without refilling, resetting its budget",
                                now.duration_since(deadline)
                            );
                            bucket.force_remaining(1);
                        }
                        _ => {
                            let delay = deadline
                                .map_or(Duration::ZERO, |deadline| {
                                    deadline.saturating_duration_since(now)
                                })
                                .max(config.block_grace);
                            warn!(
                                "Pre-emptive rate limit on {} {}, bucket {bucket} resets in {delay:?}",
                                request.method, request.url
                            );
                            sleep(delay).await;
                        }
                    }
                    continue;
                }
                debug!("Request for {bucket} allowed, {remaining} left");
            }

            // No send may start while a global limit is in effect
            if !self.inner.gate.is_open() {
                debug!("Request for {bucket} held back by the global rate limit");
                self.inner.gate.wait_open().await;
            }
            drop(in_use.take());

            let response = match self.inner.transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{} {} failed: {e}", request.method, request.url);
                    if let Some(ticket) = probe.take() {
                        ticket.fail();
                    }
                    return Err(e.into());
                }
            };
            trace!("Response for {} {}: {}", request.method, request.url, response.body);

            probe = self.update_bucket(&key, &bucket, &response, probe.take());

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                let Some(delay) = self.retry_after(&response) else {
                    return Err(ErrorKind::RateLimited(Box::new(FailedRequest {
                        method: request.method.clone(),
                        url: request.url.clone(),
                        response,
                    })));
                };

                if limit_headers::is_global(&response.headers) {
                    error!("Global rate limit hit, blocking all requests for {delay:?}");
                    let _closure = self.inner.gate.close();
                    sleep(delay).await;
                } else {
                    warn!(
                        "Rate limit hit on {} {} (bucket {bucket}), retrying in {delay:?}",
                        request.method, request.url
                    );
                    sleep(delay).await;
                }
                continue;
            }

            if let Some(error) = ErrorKind::from_response(&request.method, &request.url, &response)
            {
                return Err(error);
            }
            return Ok(response);
        }
    }

    fn retry_after(&self, response: &Response) -> Option<Duration> {
        let value = response.headers.get(header::RETRY_AFTER)?;
        limit_headers::parse_retry_after(value, self.inner.config.retry_after_precision)
            .inspect_err(|e| warn!("Ignoring Retry-After header: {e}"))
            .ok()
    }

    /// Apply the limit headers of a response to its bucket.
    ///
    /// Returns the probe ticket if the probe has to be retried without having
    /// learned anything.
    fn update_bucket(
        &self,
        key: &HashKey,
        bucket: &Arc<Bucket>,
        response: &Response,
        probe: Option<ProbeTicket>,
    ) -> Option<ProbeTicket> {
        let rate_limited = response.status == StatusCode::TOO_MANY_REQUESTS;

        // Returning without the ticket fails the probe
        if limit_headers::is_global(&response.headers) && !rate_limited {
            return None;
        }

        let Some(limits) = RateLimitHeaders::parse(&response.headers) else {
            if rate_limited {
                return probe;
            }
            if probe.is_none() && bucket.is_limit_known() {
                debug!("Bucket {bucket} stopped reporting limits, forgetting route {key}");
                bucket.reset_to_initial();
                self.inner.registry.forget(key, bucket);
            }
            return None;
        };

        let Some((reset, reset_after)) = self.next_reset(&limits, &response.headers) else {
            warn!("Ignoring out of range reset reported for bucket {bucket}");
            return if rate_limited { probe } else { None };
        };

        match probe {
            Some(ticket) => {
                bucket.set_initial(limits.limit, limits.remaining, reset, reset_after);
                debug!("Learned limits of bucket {bucket}");
                ticket.complete();
            }
            None if limits.limit > bucket.maximum() => {
                debug!(
                    "Unexpected limit values encountered for {bucket}. Updating to [{}/{}]",
                    limits.remaining, limits.limit
                );
                bucket.set_initial(limits.limit, limits.remaining, reset, reset_after);
            }
            None => {
                bucket.set_maximum(limits.limit);
                bucket.record_reset(Instant::now(), reset, reset_after);
            }
        }

        if let Some(hash) = &limits.bucket {
            self.inner.registry.rebucket(key, bucket, hash);
        }
        None
    }

    /// When the window described by `limits` resets on the local clock.
    ///
    /// Relative timing also returns the reset-after duration. `None` if the
    /// reset lies beyond what the clock can represent.
    fn next_reset(
        &self,
        limits: &RateLimitHeaders,
        headers: &HeaderMap,
    ) -> Option<(Instant, Option<Duration>)> {
        let now = Instant::now();
        let config = &self.inner.config;

        if config.use_relative_ratelimit {
            let after = Duration::try_from_secs_f64(limits.reset_after).unwrap_or(Duration::ZERO);
            let reset = now
                .checked_add(after)?
                .checked_add(config.wait_override.unwrap_or(Duration::ZERO))?;
            return Some((reset, Some(after)));
        }

        let delta = match config.wait_override {
            Some(delta) => delta,
            None => {
                let reset_at = UNIX_EPOCH.checked_add(
                    Duration::try_from_secs_f64(limits.reset).unwrap_or(Duration::ZERO),
                )?;
                let server_now =
                    limit_headers::server_date(headers).unwrap_or_else(SystemTime::now);
                reset_at.duration_since(server_now).unwrap_or(Duration::ZERO)
            }
        };
        Some((now.checked_add(delta)?, None))
    }
}
