//! `test-utils` is used for testing `bucketeer-lib`.
//! This crate does not depend on `bucketeer-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Set up a mock server whose `GET {path}` answers with an exhausted window:
/// `X-RateLimit-Limit: {limit}`, `X-RateLimit-Remaining: 0` and a reset
/// `{reset_after}` seconds in the future.
#[macro_export]
macro_rules! exhausted_mock_server {
    ($path:expr, $limit:expr, $reset_after:expr $(,)?) => {{
        let mock_server = wiremock::MockServer::start().await;
        let template = wiremock::ResponseTemplate::new(http::StatusCode::OK)
            .insert_header("X-RateLimit-Limit", $limit.to_string().as_str())
            .insert_header("X-RateLimit-Remaining", "0")
            .insert_header("X-RateLimit-Reset-After", $reset_after.to_string().as_str());
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path($path))
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }};
}
