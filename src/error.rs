use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the Joystick SDK.
///
/// Use [`Error::kind()`] to switch on the category of an error without matching on every
/// variant.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Caller supplied a malformed argument (API key, user id, semVer, content ids, ...). Never
    /// retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server answered with a 4xx status.
    #[error("bad request (status {status}): {message}")]
    BadRequest {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The server answered with a 5xx status (after retries, when the request was retryable).
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The server answered with a status that is neither 200, 4xx nor 5xx.
    #[error("unexpected response status {status}: {message}")]
    UnknownHttp {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The combine call succeeded but at least one content id failed server-side.
    #[error("{message}")]
    MultipleContents {
        /// One line per failed content id, each prefixed with `- `.
        message: String,
        /// Ids that failed, in ascending order.
        failed_ids: Vec<String>,
    },

    /// The request never produced a response.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The response body could not be decoded.
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    #[error("failed to decode response: {0}")]
    Deserialization(#[source] Arc<serde_json::Error>),
}

/// Coarse category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`] and [`Error::InvalidBaseUrl`].
    InvalidArgument,
    /// See [`Error::BadRequest`].
    BadRequest,
    /// See [`Error::ServerError`].
    ServerError,
    /// See [`Error::UnknownHttp`].
    UnknownHttp,
    /// See [`Error::MultipleContents`].
    MultipleContents,
    /// See [`Error::Network`].
    Network,
    /// See [`Error::Deserialization`].
    Deserialization,
}

impl ErrorKind {
    /// Whether the error originates from a non-success HTTP status.
    pub fn is_http(self) -> bool {
        matches!(
            self,
            ErrorKind::BadRequest | ErrorKind::ServerError | ErrorKind::UnknownHttp
        )
    }
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::InvalidBaseUrl(_) => ErrorKind::InvalidArgument,
            Error::BadRequest { .. } => ErrorKind::BadRequest,
            Error::ServerError { .. } => ErrorKind::ServerError,
            Error::UnknownHttp { .. } => ErrorKind::UnknownHttp,
            Error::MultipleContents { .. } => ErrorKind::MultipleContents,
            Error::Network(_) => ErrorKind::Network,
            Error::Deserialization(_) => ErrorKind::Deserialization,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::BadRequest { status, .. }
            | Error::ServerError { status, .. }
            | Error::UnknownHttp { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Classify a non-200 status into the matching HTTP error variant.
    pub(crate) fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => Error::BadRequest { status, message },
            500..=u16::MAX => Error::ServerError { status, message },
            _ => Error::UnknownHttp { status, message },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Deserialization(Arc::new(value))
    }
}

/// Failure that happened before any response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("network error ({kind:?}): {message}")]
pub struct NetworkError {
    /// What went wrong.
    pub kind: NetworkErrorKind,
    /// Human readable description from the transport.
    pub message: String,
}

impl NetworkError {
    /// Create a new network error.
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        NetworkError {
            kind,
            message: message.into(),
        }
    }
}

/// Classification of transport failures that produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// Connection refused or reset.
    Connect,
    /// Request or body transfer failed mid-flight.
    Io,
    /// The request exceeded its timeout budget.
    Timeout,
    /// Host name could not be resolved or the network is unreachable.
    Dns,
    /// TLS handshake or certificate verification failed.
    Tls,
    /// The request was cancelled before completion.
    Cancelled,
}

impl NetworkErrorKind {
    /// Whether a request failing this way may be retried. Timeouts, cancellations, name
    /// resolution and certificate failures are not expected to heal on their own.
    pub fn is_retry_allowed(self) -> bool {
        matches!(self, NetworkErrorKind::Connect | NetworkErrorKind::Io)
    }
}
