//! Session that re-issues requests on transient failures.

use anyhow::{Context, Result};
use log::{debug, error, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use std::sync::Arc;
use std::time::Duration;

use super::retry::{
    HttpStatusError, LastFailure, MaxRetriesError, RetryPolicy, StatusClass, classify_status,
    is_transient_error,
};
use super::sleep::{Sleeper, TokioSleeper};

const USER_AGENT: &str = concat!("snowrac/", env!("SNOWRAC_VERSION"));

/// Per-request extras layered on top of the session defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with no extra headers, no body and the client's timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header, replacing a session default of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a single attempt inside the retry loop.
enum Attempt {
    Success(Response),
    Retry(LastFailure),
    Fatal(anyhow::Error),
}

/// HTTP session holding the instance credentials and JSON default headers.
///
/// Every verb goes through [`Session::send`], which retries 502/503/504
/// responses, timeouts and dropped connections with exponential backoff,
/// and hands any other failure straight back to the caller.
#[derive(Clone)]
pub struct Session {
    client: Client,
    username: String,
    password: String,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("password", &"*********")
            .field("policy", &self.policy)
            .finish()
    }
}

impl Session {
    /// Creates a session with its own connection pool and the JSON default headers.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(client, username, password))
    }

    /// Wraps an existing reqwest Client. Default headers are whatever that client carries.
    pub fn with_client(
        client: Client,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client,
            username: username.into(),
            password: password.into(),
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the retry bounds and backoff.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Retry bounds and backoff in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// User the session authenticates as.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Sends a HEAD request through the retry loop.
    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::HEAD, url, options).await
    }

    /// Sends a GET request through the retry loop.
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::GET, url, options).await
    }

    /// Sends a POST request through the retry loop.
    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::POST, url, options).await
    }

    /// Sends a PUT request through the retry loop.
    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::PUT, url, options).await
    }

    /// Sends a PATCH request through the retry loop.
    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::PATCH, url, options).await
    }

    /// Sends a DELETE request through the retry loop.
    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.send(Method::DELETE, url, options).await
    }

    /// Issues `method` against `url` until a 200 arrives, a fatal error occurs,
    /// or `max_retries` attempts have been made.
    ///
    /// The attempt counter, the current delay and the last failure live only in
    /// this call. At exhaustion the last transient error is reported, falling
    /// back to the last unexpected status when no transient error occurred.
    #[tracing::instrument(skip(self, options))]
    pub async fn send(&self, method: Method, url: &str, options: RequestOptions) -> Result<Response> {
        let max_retries = self.policy.max_retries;
        let mut delay = self.policy.retry_delay;
        let mut last_error = None;
        let mut last_status = None;

        for attempt in 1..=max_retries {
            debug!("{} {} (attempt {}/{})...", method, url, attempt, max_retries);

            match self.attempt(&method, url, &options, attempt).await {
                Attempt::Success(response) => return Ok(response),
                Attempt::Fatal(e) => {
                    debug!("{}: non-retryable error: {}", method, e);
                    return Err(e);
                }
                Attempt::Retry(LastFailure::Error(msg)) => last_error = Some(msg),
                Attempt::Retry(LastFailure::Status(code)) => last_status = Some(code),
            }

            if attempt < max_retries {
                warn!(
                    "{}: Request {} - backoff for {} sec",
                    method,
                    attempt,
                    delay.as_secs_f64()
                );
                self.sleeper.sleep(delay).await;
                delay = delay.saturating_mul(self.policy.retry_backoff);
            }
        }

        let last = last_error
            .map(LastFailure::Error)
            .or(last_status.map(LastFailure::Status));
        let err = MaxRetriesError {
            method,
            max_retries,
            last,
        };
        error!("{}", err);
        Err(err.into())
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        attempt: usize,
    ) -> Attempt {
        let mut request = self
            .client
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.password))
            .headers(options.headers.clone());
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                match classify_status(status) {
                    StatusClass::Success => Attempt::Success(response),
                    StatusClass::Transient => {
                        let msg = format!("HTTP {} for url: {}", status, url);
                        error!("{}: Request Error: {}...retry {}", method, msg, attempt);
                        Attempt::Retry(LastFailure::Error(msg))
                    }
                    StatusClass::Fatal => Attempt::Fatal(
                        HttpStatusError {
                            method: method.clone(),
                            status,
                            url: url.to_string(),
                        }
                        .into(),
                    ),
                    StatusClass::Unexpected => {
                        error!(
                            "{}: Request Error: HTTP {} for url: {}...retry {}",
                            method, status, url, attempt
                        );
                        Attempt::Retry(LastFailure::Status(status.as_u16()))
                    }
                }
            }
            Err(e) if is_transient_error(&e) => {
                error!("{}: Request Error: {}...retry {}", method, e, attempt);
                Attempt::Retry(LastFailure::Error(e.to_string()))
            }
            Err(e) => Attempt::Fatal(
                anyhow::Error::from(e).context(format!("{} request to {} failed", method, url)),
            ),
        }
    }
}
