//! Handle rate limiting headers.
//!
//! The server describes a bucket with a family of `X-RateLimit-*` headers:
//!
//! | header | meaning |
//! |---|---|
//! | `X-RateLimit-Limit` | requests allowed per window |
//! | `X-RateLimit-Remaining` | requests left in the current window |
//! | `X-RateLimit-Reset` | epoch seconds at which the window resets |
//! | `X-RateLimit-Reset-After` | seconds until the window resets |
//! | `X-RateLimit-Bucket` | opaque hash naming the bucket |
//! | `X-RateLimit-Global` | set on 429s caused by the global limit |

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::ratelimit::RetryAfterPrecision;

pub(crate) const LIMIT: &str = "x-ratelimit-limit";
pub(crate) const REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const RESET: &str = "x-ratelimit-reset";
pub(crate) const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub(crate) const BUCKET: &str = "x-ratelimit-bucket";
pub(crate) const GLOBAL: &str = "x-ratelimit-global";
pub(crate) const PRECISION: &str = "x-ratelimit-precision";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Limit information carried by a single response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RateLimitHeaders {
    pub(crate) limit: i64,
    pub(crate) remaining: i64,
    /// Absolute reset, in seconds since the Unix epoch
    pub(crate) reset: f64,
    /// Relative reset, in seconds
    pub(crate) reset_after: f64,
    pub(crate) bucket: Option<String>,
}

impl RateLimitHeaders {
    /// Parse the limit headers of a response.
    ///
    /// Returns `None` unless all of limit, remaining, reset and reset-after
    /// are present and numeric. The bucket hash is optional.
    pub(crate) fn parse(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            limit: parse_header_value(headers, LIMIT)?,
            remaining: parse_header_value(headers, REMAINING)?,
            reset: parse_header_value(headers, RESET)?,
            reset_after: parse_header_value(headers, RESET_AFTER)?,
            bucket: header_str(headers, BUCKET).map(ToString::to_string),
        })
    }
}

/// Returns `true` if the response reports the global rate limit
pub(crate) fn is_global(headers: &HeaderMap) -> bool {
    header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Parse the server's `Date` header, if present and valid
pub(crate) fn server_date(headers: &HeaderMap) -> Option<SystemTime> {
    header_str(headers, http::header::DATE.as_str())
        .and_then(|date| httpdate::parse_http_date(date).ok())
}

/// Parse the "Retry-After" header.
///
/// Numeric values are interpreted in the unit given by `precision`, which may
/// be fractional. As a fallback, an HTTP-date is accepted as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
pub(crate) fn parse_retry_after(
    value: &HeaderValue,
    precision: RetryAfterPrecision,
) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?
        .trim();

    if let Ok(number) = value.parse::<f64>() {
        if !number.is_finite() || number < 0.0 {
            return Err(RetryAfterParseError::ValueError(value.into()));
        }
        let secs = match precision {
            RetryAfterPrecision::Milliseconds => number / 1000.0,
            RetryAfterPrecision::Seconds => number,
        };
        return Duration::try_from_secs_f64(secs)
            .map_err(|_| RetryAfterParseError::ValueError(value.into()));
    }

    httpdate::parse_http_date(value)
        .map(|s| {
            s.duration_since(SystemTime::now())
                // if date is in the past, we can use ZERO
                .unwrap_or(Duration::ZERO)
        })
        .map_err(|_| RetryAfterParseError::ValueError(value.into()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Helper method to parse numeric header values
fn parse_header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn test_retry_after_milliseconds() {
        let ms = RetryAfterPrecision::Milliseconds;
        assert_eq!(
            parse_retry_after(&value("1000"), ms),
            Ok(Duration::from_secs(1))
        );
        assert_eq!(
            parse_retry_after(&value("1500.0"), ms),
            Ok(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_retry_after(&value("-1"), ms),
            Err(RetryAfterParseError::ValueError("-1".into()))
        );
    }

    #[test]
    fn test_retry_after_seconds() {
        let secs = RetryAfterPrecision::Seconds;
        assert_eq!(
            parse_retry_after(&value("1"), secs),
            Ok(Duration::from_secs(1))
        );
        assert_eq!(
            parse_retry_after(&value("0.75"), secs),
            Ok(Duration::from_millis(750))
        );
        assert_eq!(
            parse_retry_after(&value("1e300"), secs),
            Err(RetryAfterParseError::ValueError("1e300".into()))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let secs = RetryAfterPrecision::Seconds;
        assert_eq!(
            parse_retry_after(&value("Fri, 15 May 2015 15:34:21 GMT"), secs),
            Ok(Duration::ZERO)
        );

        let result = parse_retry_after(&value("Fri, 15 May 4099 15:34:21 GMT"), secs);
        let is_in_future = matches!(result, Ok(d) if d.as_secs() > 0);
        assert!(is_in_future);

        assert_eq!(
            parse_retry_after(&value("soon"), secs),
            Err(RetryAfterParseError::ValueError("soon".into()))
        );
    }

    #[test]
    fn test_parse_limit_headers() {
        let headers = headers(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "4"),
            ("X-RateLimit-Reset", "1470173023.123"),
            ("X-RateLimit-Reset-After", "2.5"),
            ("X-RateLimit-Bucket", "abcd1234"),
        ]);

        let parsed = RateLimitHeaders::parse(&headers).unwrap();
        assert_eq!(parsed.limit, 5);
        assert_eq!(parsed.remaining, 4);
        assert!((parsed.reset - 1_470_173_023.123).abs() < f64::EPSILON);
        assert!((parsed.reset_after - 2.5).abs() < f64::EPSILON);
        assert_eq!(parsed.bucket.as_deref(), Some("abcd1234"));
    }

    #[test]
    fn test_parse_limit_headers_incomplete() {
        let headers = headers(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "4"),
            ("X-RateLimit-Reset-After", "2.5"),
        ]);
        assert_eq!(RateLimitHeaders::parse(&headers), None);

        let garbage = self::headers(&[
            ("X-RateLimit-Limit", "five"),
            ("X-RateLimit-Remaining", "4"),
            ("X-RateLimit-Reset", "1"),
            ("X-RateLimit-Reset-After", "2.5"),
        ]);
        assert_eq!(RateLimitHeaders::parse(&garbage), None);
    }

    #[test]
    fn test_global_flag() {
        assert!(is_global(&headers(&[("X-RateLimit-Global", "true")])));
        assert!(is_global(&headers(&[("X-RateLimit-Global", "True")])));
        assert!(!is_global(&headers(&[("X-RateLimit-Global", "false")])));
        assert!(!is_global(&HeaderMap::new()));
    }

    #[test]
    fn test_server_date() {
        let parsed = server_date(&headers(&[("Date", "Wed, 21 Oct 2015 07:28:00 GMT")]));
        assert_eq!(
            parsed,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480))
        );
        assert_eq!(server_date(&headers(&[("Date", "yesterday")])), None);
    }

    fn value(v: &str) -> HeaderValue {
        HeaderValue::from_str(v).unwrap()
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, v) in pairs {
            map.insert(*name, HeaderValue::from_static(v));
        }
        map
    }
}
