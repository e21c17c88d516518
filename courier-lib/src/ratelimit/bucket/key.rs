use std::fmt;

use http::Method;

use crate::RouteParams;

/// Suffix of the placeholder hash assigned to routes whose real hash is not known yet
const UNLIMITED_HASH_SUFFIX: &str = "unlimited";

/// Identity of a route for hash lookups: the method plus the route template.
///
/// This is independent of the scope a request targets, so
/// `GET /channels/:channel_id/messages` maps to one hash no matter which
/// channel is addressed.
///
/// # Examples
///
/// ```
/// use courier_lib::ratelimit::HashKey;
/// use http::Method;
///
/// let key = HashKey::new(&Method::GET, "/channels/:channel_id/messages");
/// assert_eq!(key.as_str(), "GET:/channels/:channel_id/messages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashKey(String);

impl HashKey {
    /// Create the hash key for a method and route template
    #[must_use]
    pub fn new(method: &Method, route: &str) -> Self {
        HashKey(format!("{method}:{route}"))
    }

    /// The locally generated hash used until the server reveals the real one
    #[must_use]
    pub fn unlimited_hash(&self) -> String {
        format!("{}:{UNLIMITED_HASH_SUFFIX}", self.0)
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The major parameters that partition a server-side bucket.
///
/// Missing parameters are represented by empty strings, so routes without a
/// scope share a single bucket per hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Value of the `guild_id` route parameter
    pub guild: String,
    /// Value of the `channel_id` route parameter
    pub channel: String,
    /// Value of the `webhook_id` route parameter
    pub webhook: String,
}

impl Scope {
    /// Extract the scope from route parameters
    #[must_use]
    pub fn from_params(params: &RouteParams) -> Self {
        let get = |name| params.get(name).unwrap_or_default().to_string();
        Self {
            guild: get("guild_id"),
            channel: get("channel_id"),
            webhook: get("webhook_id"),
        }
    }
}

/// Registry key of a live bucket: the hash together with the scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(String);

impl BucketId {
    /// Create the id of the bucket for `hash` within `scope`
    #[must_use]
    pub fn new(hash: &str, scope: &Scope) -> Self {
        BucketId(format!(
            "{hash}:{}:{}:{}",
            scope.guild, scope.channel, scope.webhook
        ))
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
