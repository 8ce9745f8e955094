//! Retry policy for the session, plus the classification of responses and
//! transport errors into transient and fatal failures.

use reqwest::{Method, StatusCode};
use std::io::ErrorKind;
use std::time::Duration;

/// Maximum number of attempts made for one logical request.
pub const MAX_RETRIES: usize = 3;

/// Delay before the first retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Multiplier applied to the delay after each failed attempt.
pub const RETRY_BACKOFF: u32 = 2;

/// Bounds and backoff used by [`Session`](super::Session) when re-issuing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_retries: usize,
    /// Delay slept after the first failed attempt.
    pub retry_delay: Duration,
    /// Factor the delay grows by after every further failed attempt.
    pub retry_backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// How a received HTTP status drives the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200, handed back to the caller.
    Success,
    /// 502, 503 or 504: retried after a backoff.
    Transient,
    /// Any other 4xx/5xx: propagated without retry.
    Fatal,
    /// Neither an error nor a 200 (e.g. 201, 204 or an unfollowed 3xx).
    /// Retried, and reported by status code once attempts run out.
    Unexpected,
}

/// Maps a response status onto the retry loop's decision.
pub fn classify_status(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::OK => StatusClass::Success,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StatusClass::Transient
        }
        s if s.is_client_error() || s.is_server_error() => StatusClass::Fatal,
        _ => StatusClass::Unexpected,
    }
}

/// Returns true for transport failures worth another attempt:
/// timeouts and refused, reset or dropped connections.
///
/// Redirect exhaustion and request-building errors are never transient. Any
/// other error raised while sending (TLS handshake failures included) is.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    if error.is_redirect() || error.is_builder() || error.is_status() || error.is_decode() {
        return false;
    }

    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = err.source();
    }

    // Connection closed before a response arrived, or the handshake failed
    error.is_request()
}

/// What the last failed attempt observed before the session gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastFailure {
    /// A transient error (transport failure or 502/503/504).
    Error(String),
    /// A response that was neither an error nor a 200.
    Status(u16),
}

/// Raised once every attempt allowed by the [`RetryPolicy`] has been used up.
#[derive(Debug)]
pub struct MaxRetriesError {
    pub method: Method,
    pub max_retries: usize,
    pub last: Option<LastFailure>,
}

impl std::fmt::Display for MaxRetriesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: Max Retries({}) exceeded.", self.method, self.max_retries)?;
        match &self.last {
            Some(LastFailure::Error(msg)) => write!(f, " {}", msg),
            Some(LastFailure::Status(code)) => write!(f, " Http status code: {}", code),
            None => Ok(()),
        }
    }
}

impl std::error::Error for MaxRetriesError {}

/// An HTTP error status that retrying will not fix.
#[derive(Debug)]
pub struct HttpStatusError {
    pub method: Method,
    pub status: StatusCode,
    pub url: String,
}

impl HttpStatusError {
    /// True for 404.
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    /// True for 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            StatusCode::UNAUTHORIZED => write!(
                f,
                "{}: Authentication failed for {}. Check the instance credentials.",
                self.method, self.url
            ),
            StatusCode::NOT_FOUND => write!(f, "{}: Not found: {}", self.method, self.url),
            status => write!(
                f,
                "{}: HTTP {} error for {}",
                self.method,
                status.as_u16(),
                self.url
            ),
        }
    }
}

impl std::error::Error for HttpStatusError {}
