//! The seam between buckets and the network.
//!
//! A bucket never talks HTTP itself. It hands a [`CallRequest`] to a
//! [`Transport`] and integrates the returned [`Response`], whose
//! [`RateLimitHeaders`] drive the bucket's window and the global limiter.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use typed_builder::TypedBuilder;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::ratelimit::{CallRequest, RateLimitHeaders};
use crate::{ErrorKind, Result};

/// Default user agent, `bucketeer/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("bucketeer/", env!("CARGO_PKG_VERSION"));

/// The outcome of one send as seen by the transport.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status of the response
    pub status: StatusCode,
    /// Raw response headers
    pub headers: HeaderMap,
    /// Response body as text
    pub body: String,
    /// Rate limit information parsed from the headers
    pub rate_limit: RateLimitHeaders,
}

impl Response {
    /// A response without headers or body, mostly useful for custom transports
    #[must_use]
    pub fn new(status: StatusCode, rate_limit: RateLimitHeaders) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
            rate_limit,
        }
    }
}

/// Performs the actual network exchange for a call.
///
/// A bucket sends each call once and frees the call's slot as soon as
/// `send` returns. Any retry policy belongs to the implementation.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send `request` and report the response
    async fn send(&self, request: CallRequest) -> Result<Response>;
}

/// Builder for [`HttpTransport`].
#[derive(TypedBuilder, Debug, Clone)]
#[builder(builder_method(doc = "
Create a builder for building `TransportBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `TransportBuilder`.
"))]
pub struct TransportBuilder {
    /// Base URL that call endpoints are appended to, e.g. `https://discord.com/api/v10`.
    base_url: Url,
    /// User-agent sent with every call.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)", setter(into))]
    user_agent: String,
    /// Optional token, sent verbatim as the `Authorization` header.
    #[builder(default, setter(strip_option))]
    token: Option<SecretString>,
    /// Additional [headers] for every call.
    ///
    /// [headers]: https://docs.rs/http/latest/http/header/struct.HeaderName.html
    #[builder(default)]
    custom_headers: HeaderMap,
    /// Response timeout per call.
    #[builder(default, setter(strip_option))]
    timeout: Option<Duration>,
    /// Clock used to resolve relative reset headers.
    #[builder(default_code = "Arc::new(SystemClock)")]
    clock: Arc<dyn Clock>,
}

impl TransportBuilder {
    /// Instantiates an [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user agent or token contains characters not allowed in a header value.
    /// - The request client cannot be created.
    pub fn transport(self) -> Result<HttpTransport> {
        let Self {
            base_url,
            user_agent,
            token,
            custom_headers: mut headers,
            timeout,
            clock,
        } = self;

        headers.insert(header::USER_AGENT, HeaderValue::from_str(&user_agent)?);

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(token.expose_secret())?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers);

        let client = (match timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)?;

        Ok(HttpTransport {
            client,
            base_url,
            clock,
        })
    }
}

/// A [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    clock: Arc<dyn Clock>,
}

impl HttpTransport {
    fn url(&self, endpoint: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        Url::parse(&format!("{base}/{endpoint}"))
            .map_err(|e| ErrorKind::InvalidEndpoint(endpoint.to_string(), e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: CallRequest) -> Result<Response> {
        let url = self.url(&request.endpoint)?;
        let mut builder = self.client.request(request.method, url);
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(ErrorKind::NetworkRequest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let rate_limit = RateLimitHeaders::from_response(status, &headers, self.clock.now());
        let body = response.text().await.map_err(ErrorKind::ReadResponseBody)?;

        Ok(Response {
            status,
            headers,
            body,
            rate_limit,
        })
    }
}
