//! Error types for the resource API client.
//!
//! # Design
//! Each layer gets its own error enum: the value types raise
//! `ValidationError`, the transport raises `TransportError` (with
//! `ProtocolError` for undecodable bodies), the token exchange raises
//! `AuthError`, and the cache raises `CacheError`. `Client` operations fold
//! all of them into `ApiError`, which keeps the originating error as its
//! `source()` so callers can match on the kind and still log the cause.

use thiserror::Error;

/// Malformed input to a client operation. Always raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A response status code outside `100..=600`.
    #[error("http code must be >= 100 and <= 600, got {0}")]
    HttpCode(u16),

    /// A required string argument (resource, id, config value) was empty.
    #[error("{0} must be a non-empty string")]
    Empty(&'static str),

    /// An HTTP method other than GET, POST, PUT or DELETE.
    #[error("unsupported method '{0}' given")]
    UnsupportedMethod(String),

    /// The request payload could not be encoded as JSON.
    #[error("request body could not be encoded: {0}")]
    Body(String),
}

/// The response body was present but could not be decoded as JSON.
#[derive(Debug, Error)]
#[error("unable to parse response body: {source}")]
pub struct ProtocolError {
    #[from]
    source: serde_json::Error,
}

/// Failure to execute a request or to make sense of the raw response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a status line we cannot represent.
    #[error("unable to determine response HTTP code, got {0}")]
    InvalidStatus(u16),

    /// The body arrived but was not JSON.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Any other failure reported by the HTTP engine.
    #[error("transport failure: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The client-credentials token exchange did not yield a token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint answered with a non-200 status. The message is the
    /// server-supplied `error_description`.
    #[error("{description}")]
    Rejected { status: u16, description: String },

    /// The token endpoint answered 200 without an `access_token`.
    #[error("token response did not contain an access_token")]
    MissingToken,

    /// The token request itself could not be executed.
    #[error("unable to reach token endpoint: {0}")]
    Transport(#[source] TransportError),
}

/// Failure to read or write a cached response.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The response's `Expires` header is not a date we understand.
    #[error("unable to parse Expires value of '{0}'")]
    InvalidExpires(String),

    /// Only GET requests may be cached; the key ignores the method.
    #[error("{0} requests are not cacheable")]
    NotCacheable(crate::http::Method),

    /// The backing store failed.
    #[error("cache store failure: {0}")]
    Store(#[from] rusqlite::Error),

    /// A stored document could not be encoded or decoded.
    #[error("cache document is malformed: {0}")]
    Document(#[from] serde_json::Error),

    /// A stored document violated a `Response` invariant.
    #[error("cached response is invalid: {0}")]
    Invalid(#[from] ValidationError),
}

/// Coarse classification of an [`ApiError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transport,
    Protocol,
    Auth,
    Cache,
}

/// The single error surface of every `Client` operation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Validation(#[source] ValidationError),

    #[error("unable to make request: {0}")]
    Transport(#[source] TransportError),

    #[error("unable to make request: {0}")]
    Protocol(#[source] ProtocolError),

    #[error("unable to authenticate: {0}")]
    Auth(#[source] AuthError),

    #[error("cache failure: {0}")]
    Cache(#[source] CacheError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::Protocol(_) => ErrorKind::Protocol,
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::Cache(_) => ErrorKind::Cache,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(protocol) => ApiError::Protocol(protocol),
            other => ApiError::Transport(other),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache(err)
    }
}
