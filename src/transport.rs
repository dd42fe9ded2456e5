//! HTTP transport abstraction and its `reqwest` implementation.
use std::{error::Error as _, io, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method, StatusCode,
};

use crate::{error::NetworkErrorKind, Error, NetworkError};

/// A JSON request to the Joystick API.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters, appended in order.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: serde_json::Value,
    /// Timeout for this attempt. `None` means no limit.
    pub timeout: Option<Duration>,
    /// Whether the retry layer may re-send this request at all.
    pub retry_allowed: bool,
}

impl HttpRequest {
    /// Create a request with no query, no timeout and retries allowed.
    pub fn new(method: Method, url: impl Into<String>, body: serde_json::Value) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            query: Vec::new(),
            body,
            timeout: None,
            retry_allowed: true,
        }
    }
}

/// A successful (status 200) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Response body as text.
    pub body: String,
}

/// Why a request did not produce a 200 response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// A response arrived with a status other than 200.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or the status reason when the body is empty.
        message: String,
    },
    /// No response arrived.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Status { status, message } => Error::from_status(status, message),
            TransportError::Network(err) => Error::Network(err),
        }
    }
}

/// Sends [`HttpRequest`]s. Implementations must treat every status other than 200 as a
/// [`TransportError::Status`].
pub trait Transport {
    /// Send one attempt of `request`.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

/// Blocking [`Transport`] over `reqwest`, authenticating with the `x-api-key` header.
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Create a transport sending `api_key` with every request.
    pub fn new(api_key: &str) -> crate::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut api_key = HeaderValue::from_str(api_key)
            .map_err(|_| Error::invalid_argument("apiKey is not a valid header value"))?;
        api_key.set_sensitive(true);
        headers.insert("x-api-key", api_key);

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("joystick-rust/", env!("CARGO_PKG_VERSION")))
            // Requests carry their own timeout.
            .timeout(None)
            .build()
            .map_err(|err| Error::Network(classify_reqwest_error(err)))?;

        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query)
            .json(&request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .map_err(|err| TransportError::Network(classify_reqwest_error(err)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| TransportError::Network(classify_reqwest_error(err)))?;

        if status != StatusCode::OK {
            let message = if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_owned()
            } else {
                body
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(HttpResponse { body })
    }
}

/// Map a `reqwest` failure onto [`NetworkErrorKind`].
///
/// Only the sources below the top-level error are inspected. The top-level message embeds the
/// request URL, whose path and content ids must not influence the classification.
fn classify_reqwest_error(err: reqwest::Error) -> NetworkError {
    let err = err.without_url();

    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if causes(&err).any(|cause| is_dns_failure(&cause.to_string())) {
        NetworkErrorKind::Dns
    } else if causes(&err).any(|cause| is_tls_failure(&cause.to_string())) {
        NetworkErrorKind::Tls
    } else if err.is_connect() || causes(&err).any(is_connection_failure) {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Io
    };

    NetworkError::new(kind, describe_chain(&err))
}

/// Sources of `err`, outermost first, excluding `err` itself.
fn causes(err: &reqwest::Error) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
    std::iter::successors(err.source(), |&cause: &&(dyn std::error::Error + 'static)| cause.source())
}

/// Join the error and all its sources into one line. `reqwest` hides the root cause (DNS, TLS)
/// several levels down.
fn describe_chain(err: &reqwest::Error) -> String {
    causes(err).fold(err.to_string(), |mut description, cause| {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        description
    })
}

fn is_connection_failure(cause: &(dyn std::error::Error + 'static)) -> bool {
    cause.downcast_ref::<io::Error>().is_some_and(|err| {
        matches!(
            err.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
        )
    })
}

fn is_dns_failure(cause: &str) -> bool {
    let cause = cause.to_ascii_lowercase();
    cause.contains("dns error")
        || cause.contains("failed to lookup address")
        || cause.contains("name or service not known")
}

fn is_tls_failure(cause: &str) -> bool {
    let cause = cause.to_ascii_lowercase();
    cause.contains("certificate") || cause.contains("tls") || cause.contains("ssl")
}
