use std::collections::BTreeMap;
use std::fmt::{self, Display};

use http::{HeaderMap, Method};
use typed_builder::TypedBuilder;

/// Named values substituted into the `:name` placeholders of a route template.
///
/// The `guild_id`, `channel_id` and `webhook_id` parameters additionally scope
/// the rate limit bucket a request is charged to.
///
/// # Examples
///
/// ```
/// use courier_lib::RouteParams;
///
/// let params = RouteParams::new().with("channel_id", 42).with("message_id", 7);
/// assert_eq!(params.get("channel_id"), Some("42"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, formatting the value with its [`Display`] implementation
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a parameter, replacing any previous value with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Display) {
        self.0.insert(name.into(), value.to_string());
    }

    /// Get a parameter value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Iterate over all parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// A file attached to a multipart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name reported to the server
    pub file_name: String,
    /// Raw file contents
    pub content: Vec<u8>,
}

/// An already serialized request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A JSON document, sent with `Content-Type: application/json`
    Json(String),
    /// A `multipart/form-data` payload made of text fields and files.
    ///
    /// Files are sent as parts named `file1`, `file2`, and so on.
    Multipart {
        /// Plain text form fields
        fields: Vec<(String, String)>,
        /// Attached files
        files: Vec<Attachment>,
    },
}

impl Body {
    /// Short description used for logging, without dumping binary data
    pub(crate) fn describe(&self) -> &str {
        match self {
            Body::Json(json) => json,
            Body::Multipart { .. } => "<multipart request>",
        }
    }
}

/// A request submitted by a caller, before its route is resolved.
///
/// # Examples
///
/// ```
/// use courier_lib::{Body, Request, RouteParams};
/// use http::Method;
///
/// let request = Request::builder()
///     .method(Method::POST)
///     .route("/channels/:channel_id/messages")
///     .params(RouteParams::new().with("channel_id", 42))
///     .body(Body::Json(r#"{"content":"hi"}"#.to_string()))
///     .build();
/// assert_eq!(request.route, "/channels/:channel_id/messages");
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct Request {
    /// HTTP method
    #[builder(default = Method::GET)]
    pub method: Method,
    /// Route template with `:name` placeholders, e.g. `/channels/:channel_id/messages`
    #[builder(setter(into))]
    pub route: String,
    /// Values for the route placeholders
    #[builder(default)]
    pub params: RouteParams,
    /// Extra headers for this request only
    #[builder(default)]
    pub headers: HeaderMap,
    /// Optional payload
    #[builder(default, setter(strip_option))]
    pub body: Option<Body>,
}

impl Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}
