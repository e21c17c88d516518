//! Compilation of route templates into concrete paths.
//!
//! A route template such as `/channels/:channel_id/messages/:message_id`
//! names its variable parts with `:name` placeholders. Compiling it against a
//! set of [`RouteParams`] substitutes every placeholder and extracts the
//! [`Scope`] used to pick the rate limit bucket.

use std::sync::LazyLock;

use regex::Regex;

use crate::ratelimit::Scope;
use crate::{ErrorKind, Result, RouteParams};

static ROUTE_ARGUMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":([a-z_]+)").unwrap());

/// A route template with all placeholders substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoute {
    /// The concrete path, e.g. `/channels/42/messages`
    pub path: String,
    /// Bucket scope extracted from the parameters
    pub scope: Scope,
}

/// Substitute the placeholders of `route` with values from `params`.
///
/// # Errors
///
/// Returns [`ErrorKind::MissingRouteParameter`] if a placeholder has no value.
///
/// # Examples
///
/// ```
/// use courier_lib::{RouteParams, route::compile};
///
/// let params = RouteParams::new().with("channel_id", 42);
/// let compiled = compile("/channels/:channel_id/messages", &params).unwrap();
/// assert_eq!(compiled.path, "/channels/42/messages");
/// assert_eq!(compiled.scope.channel, "42");
/// ```
pub fn compile(route: &str, params: &RouteParams) -> Result<CompiledRoute> {
    let mut path = String::with_capacity(route.len());
    let mut last = 0;

    for captures in ROUTE_ARGUMENT.captures_iter(route) {
        // Group 0 and 1 always exist for a match of this pattern
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = params
            .get(name.as_str())
            .ok_or_else(|| ErrorKind::MissingRouteParameter {
                route: route.to_string(),
                parameter: name.as_str().to_string(),
            })?;

        path.push_str(&route[last..whole.start()]);
        path.push_str(value);
        last = whole.end();
    }
    path.push_str(&route[last..]);

    Ok(CompiledRoute {
        path,
        scope: Scope::from_params(params),
    })
}
