//! Error types for glsync ingestion
//!
//! HTTP failures are classified into a closed set of [`ErrorKind`]s keyed by
//! status code. Each kind carries a default message and a retryable flag; the
//! client consults the flag to decide between backing off and aborting.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use glsync_common::CommonError;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::transform::TransformError;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Classification of a non-success HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    RateLimited,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GenericError,
}

impl ErrorKind {
    /// Map an HTTP status code to its kind. Anything outside the table is
    /// `GenericError`.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::BadRequest,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            422 => ErrorKind::UnprocessableEntity,
            429 => ErrorKind::RateLimited,
            500 => ErrorKind::InternalServerError,
            501 => ErrorKind::NotImplemented,
            502 => ErrorKind::BadGateway,
            503 => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::GenericError,
        }
    }

    /// Whether the client should back off and try again
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::UnprocessableEntity
                | ErrorKind::RateLimited
                | ErrorKind::InternalServerError
                | ErrorKind::NotImplemented
                | ErrorKind::BadGateway
                | ErrorKind::ServiceUnavailable
        )
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "A validation exception has occurred.",
            ErrorKind::Unauthorized => {
                "The access token provided is expired, revoked, malformed or invalid for other reasons."
            }
            ErrorKind::Forbidden => "You are missing the following required scopes: read",
            ErrorKind::NotFound => "The resource you have specified cannot be found.",
            ErrorKind::Conflict => {
                "The API request cannot be completed because the requested operation would conflict with an existing item."
            }
            ErrorKind::UnprocessableEntity => {
                "The request content itself is not processable by the server."
            }
            ErrorKind::RateLimited => "The API rate limit for your organisation/application pairing has been exceeded.",
            ErrorKind::InternalServerError => {
                "The server encountered an unexpected condition which prevented it from fulfilling the request."
            }
            ErrorKind::NotImplemented => {
                "The server does not support the functionality required to fulfill the request."
            }
            ErrorKind::BadGateway => "Server received an invalid response.",
            ErrorKind::ServiceUnavailable => "API service is currently unavailable.",
            ErrorKind::GenericError => "Unknown Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A classified HTTP failure, keeping the original response for diagnostics
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    pub kind: ErrorKind,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    pub message: String,
    /// Server-requested wait before the next attempt (429 only)
    pub retry_after: Option<Duration>,
}

impl HttpError {
    /// Classify a response that was not a success
    pub fn from_response(status: u16, headers: HeaderMap, body: String) -> Self {
        let kind = ErrorKind::from_status(status);
        let detail = error_detail(&body).unwrap_or_else(|| kind.default_message().to_string());
        let mut message = format!("HTTP-error-code: {status}, Error: {detail}");

        let retry_after = if kind == ErrorKind::RateLimited {
            let wait = rate_limit_delay(&headers, Utc::now().timestamp());
            let limit = header_str(&headers, "ratelimit-limit").unwrap_or("unknown");
            let remaining = header_str(&headers, "ratelimit-remaining").unwrap_or("unknown");
            match wait {
                Some(d) => message.push_str(&format!(
                    " (Retry after {} seconds. Limit: {limit}, Remaining: {remaining})",
                    d.as_secs()
                )),
                None => message.push_str(" (Retry after unknown delay.)"),
            }
            wait
        } else {
            None
        };

        Self {
            kind,
            status,
            headers,
            body,
            message,
            retry_after,
        }
    }
}

/// Pull `error` or `message` out of a JSON error body
fn error_detail(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"].iter().find_map(|key| match json.get(key)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Wait requested by a 429 response: `Retry-After` seconds first, then the
/// `RateLimit-Reset` epoch relative to `now`. `None` means the caller should
/// use its fallback delay.
pub fn rate_limit_delay(headers: &HeaderMap, now: i64) -> Option<Duration> {
    if let Some(value) = header_str(headers, "retry-after") {
        return value.parse::<u64>().ok().map(Duration::from_secs);
    }
    let reset = header_str(headers, "ratelimit-reset")?.parse::<i64>().ok()?;
    Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64))
}

/// Low-level transport failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ConnectionReset,
    Connect,
    /// Truncated or chunked-encoding body failure
    Body,
    Timeout,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::ConnectionReset => "connection reset",
            TransportKind::Connect => "connection",
            TransportKind::Body => "response body",
            TransportKind::Timeout => "timeout",
            TransportKind::Other => "transport",
        };
        f.write_str(name)
    }
}

impl TransportKind {
    /// Categorize a reqwest failure
    pub fn of(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportKind::Timeout;
        }

        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = source {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                use std::io::ErrorKind as Io;
                match io.kind() {
                    Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe => {
                        return TransportKind::ConnectionReset
                    }
                    Io::TimedOut => return TransportKind::Timeout,
                    Io::UnexpectedEof => return TransportKind::Body,
                    _ => {}
                }
            }
            source = e.source();
        }

        if err.is_connect() || err.is_request() {
            TransportKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportKind::Body
        } else {
            TransportKind::Other
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, TransportKind::Other)
    }
}

/// Errors raised by the HTTP client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Http(Box<HttpError>),

    #[error("{kind} error calling {url}: {message}")]
    Transport {
        kind: TransportKind,
        url: String,
        message: String,
    },

    #[error("Unparsable response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid request URL '{0}'")]
    InvalidUrl(String),

    #[error("Missing API credential: private_token is required")]
    MissingCredential,

    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    pub fn transport(url: impl Into<String>, err: reqwest::Error) -> Self {
        ClientError::Transport {
            kind: TransportKind::of(&err),
            url: url.into(),
            message: err.to_string(),
        }
    }

    /// Taxonomy kind for HTTP failures
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Http(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => e.kind.is_retryable(),
            ClientError::Transport { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}

impl From<HttpError> for ClientError {
    fn from(err: HttpError) -> Self {
        ClientError::Http(Box::new(err))
    }
}

/// Top-level error for a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Input(#[from] CommonError),

    #[error("Record in stream '{stream}' does not match its schema: {source}")]
    Transform {
        stream: String,
        #[source]
        source: TransformError,
    },

    #[error("Stream '{0}' requires a parent record and cannot be synced on its own")]
    DetachedChild(String),

    #[error("Parent record for stream '{0}' has no usable 'id'")]
    MissingParentId(String),

    #[error("Failed to write to the record sink: {0}")]
    Sink(#[from] std::io::Error),
}

impl SyncError {
    /// Taxonomy kind when the failure came from an HTTP response
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::Client(e) => e.kind(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_table() {
        let table = [
            (400, ErrorKind::BadRequest, false),
            (401, ErrorKind::Unauthorized, false),
            (403, ErrorKind::Forbidden, false),
            (404, ErrorKind::NotFound, false),
            (409, ErrorKind::Conflict, false),
            (422, ErrorKind::UnprocessableEntity, true),
            (429, ErrorKind::RateLimited, true),
            (500, ErrorKind::InternalServerError, true),
            (501, ErrorKind::NotImplemented, true),
            (502, ErrorKind::BadGateway, true),
            (503, ErrorKind::ServiceUnavailable, true),
            (418, ErrorKind::GenericError, false),
            (504, ErrorKind::GenericError, false),
        ];
        for (status, kind, retryable) in table {
            assert_eq!(ErrorKind::from_status(status), kind, "status {status}");
            assert_eq!(kind.is_retryable(), retryable, "status {status}");
        }
    }

    #[test]
    fn test_message_prefers_body_error_then_message() {
        let err = HttpError::from_response(400, HeaderMap::new(), r#"{"error":"bad scope"}"#.into());
        assert_eq!(err.message, "HTTP-error-code: 400, Error: bad scope");

        let err = HttpError::from_response(404, HeaderMap::new(), r#"{"message":"404 Project Not Found"}"#.into());
        assert_eq!(err.message, "HTTP-error-code: 404, Error: 404 Project Not Found");

        let err = HttpError::from_response(409, HeaderMap::new(), "<html>".into());
        assert!(err.message.ends_with(ErrorKind::Conflict.default_message()));
        assert_eq!(err.body, "<html>");
    }

    #[test]
    fn test_retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        headers.insert("ratelimit-reset", HeaderValue::from_static("2000"));
        assert_eq!(rate_limit_delay(&headers, 1000), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_reset_timestamp_is_relative_to_now() {
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-reset", HeaderValue::from_static("1030"));
        assert_eq!(rate_limit_delay(&headers, 1000), Some(Duration::from_secs(30)));
        assert_eq!(rate_limit_delay(&headers, 2000), Some(Duration::ZERO));
    }

    #[test]
    fn test_unusable_rate_limit_headers_defer_to_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(rate_limit_delay(&headers, 0), None);
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(rate_limit_delay(&headers, 0), None);
    }

    #[test]
    fn test_rate_limited_error_carries_delay() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        let err = HttpError::from_response(429, headers, String::new());
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));
        assert!(err.message.contains("Retry after 3 seconds"));
        assert!(err
            .message
            .starts_with("HTTP-error-code: 429, Error: The API rate limit for your organisation/application pairing"));
    }

    #[test]
    fn test_client_error_retryability() {
        let http: ClientError = HttpError::from_response(502, HeaderMap::new(), String::new()).into();
        assert!(http.is_retryable());
        assert_eq!(http.kind(), Some(ErrorKind::BadGateway));

        let fatal: ClientError = HttpError::from_response(401, HeaderMap::new(), String::new()).into();
        assert!(!fatal.is_retryable());

        let reset = ClientError::Transport {
            kind: TransportKind::ConnectionReset,
            url: "http://x".into(),
            message: "reset".into(),
        };
        assert!(reset.is_retryable());
        assert!(!ClientError::MissingCredential.is_retryable());
    }
}
