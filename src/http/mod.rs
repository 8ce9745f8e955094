//! Retrying HTTP session: credentials, default headers and bounded exponential backoff.

mod retry;
mod session;
mod sleep;

pub use retry::{
    HttpStatusError, LastFailure, MAX_RETRIES, MaxRetriesError, RETRY_BACKOFF, RETRY_DELAY,
    RetryPolicy, StatusClass, classify_status, is_transient_error,
};
pub use session::{RequestOptions, Session};
pub use sleep::{Sleeper, TokioSleeper};
