use std::time::Duration;

use crate::http::RetryPolicy;

/// Per-request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// API-version marker placed first in every query string.
pub const DEFAULT_API: &str = "JSONv2";

/// Construction parameters for a [`SnowClient`](crate::client::SnowClient).
#[derive(Clone)]
pub struct ClientConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub api: String,
    /// Overrides the `https://<hostname>.service-now.com/` instance URL.
    pub instance_url: Option<String>,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            api: DEFAULT_API.to_string(),
            instance_url: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    pub fn with_instance_url(mut self, url: impl Into<String>) -> Self {
        self.instance_url = Some(url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Base URL of the instance, always ending in `/`.
    pub fn instance_url(&self) -> String {
        let url = match &self.instance_url {
            Some(url) => url.clone(),
            None => format!("https://{}.service-now.com/", self.hostname),
        };
        if url.ends_with('/') {
            url
        } else {
            format!("{}/", url)
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"*********")
            .field("timeout", &self.timeout)
            .field("api", &self.api)
            .field("instance_url", &self.instance_url)
            .field("retry", &self.retry)
            .finish()
    }
}
