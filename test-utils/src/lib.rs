//! `test-utils` is used for testing in both `courier-lib` and `courier-bin`.
//! This crate does not depend on `courier-lib` or `courier-bin`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock API server, which responds with a predefined status to every
/// request, whatever its method and path
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any()).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Build a response template carrying a full set of bucket headers.
///
/// Arguments are the status, the bucket hash, the limit, the remaining count
/// and the relative reset in seconds. The absolute reset is derived from the
/// relative one.
#[macro_export]
macro_rules! ratelimit_response {
    ($status:expr, $hash:expr, $limit:expr, $remaining:expr, $reset_after:expr $(,)?) => {{
        let reset_after: f64 = $reset_after;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        wiremock::ResponseTemplate::new(http::StatusCode::from($status))
            .insert_header("X-RateLimit-Limit", $limit.to_string().as_str())
            .insert_header("X-RateLimit-Remaining", $remaining.to_string().as_str())
            .insert_header("X-RateLimit-Reset", format!("{:.3}", now + reset_after).as_str())
            .insert_header("X-RateLimit-Reset-After", format!("{reset_after:.3}").as_str())
            .insert_header("X-RateLimit-Bucket", $hash)
    }};
}

/// Build a 429 response template announcing a wait in milliseconds.
///
/// The optional last argument marks the limit as global.
#[macro_export]
macro_rules! too_many_requests {
    ($retry_after_ms:expr $(,)?) => {
        $crate::too_many_requests!($retry_after_ms, false)
    };
    ($retry_after_ms:expr, $global:expr $(,)?) => {{
        let template = wiremock::ResponseTemplate::new(http::StatusCode::TOO_MANY_REQUESTS)
            .insert_header("Retry-After", $retry_after_ms.to_string().as_str())
            .set_body_string(r#"{"message": "You are being rate limited.", "retry_after": 1}"#);
        if $global {
            template.insert_header("X-RateLimit-Global", "true")
        } else {
            template
        }
    }};
}

/// Command running the `courier` binary
#[macro_export]
macro_rules! main_command {
    () => {
        assert_cmd::cargo::cargo_bin_cmd!("courier")
    };
}
