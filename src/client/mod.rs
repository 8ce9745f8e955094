//! Client for the table-oriented legacy JSON API.
//!
//! Builds `<instance>/<table>.do?<api>&<sysparm>` requests, sends them through
//! the retrying [`Session`] and turns the response envelope into an [`Outcome`].

mod envelope;

use anyhow::{Context, Result};
use log::debug;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::http::{RequestOptions, Session};
use crate::table::Table;

pub use envelope::{Failure, Outcome, Payload, Record, interpret_get, interpret_post};
pub(crate) use envelope::json_kind;

/// Persistent connection to one instance.
///
/// Cloning is cheap and shares the underlying session and connection pool.
#[derive(Debug, Clone)]
pub struct SnowClient {
    session: Session,
    instance: String,
    api: String,
    timeout: Duration,
}

impl SnowClient {
    /// Builds a client and its session from `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let session = Session::new(&config.username, &config.password)?.with_policy(config.retry);
        Ok(Self::with_session(
            session,
            config.instance_url(),
            &config.api,
            config.timeout,
        ))
    }

    /// Builds a client over an already configured session.
    pub fn with_session(
        session: Session,
        instance: impl Into<String>,
        api: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let mut instance = instance.into();
        if !instance.ends_with('/') {
            instance.push('/');
        }
        Self {
            session,
            instance,
            api: api.into(),
            timeout,
        }
    }

    /// Instance base URL, ending in `/`.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns a handle bound to `name` and this client.
    pub fn table(&self, name: impl Into<String>) -> Table<'_> {
        Table::new(name, self)
    }

    /// Full `.do` URL for `table` with the API marker and `sysparm` query.
    pub fn url(&self, table: &str, sysparm: &str) -> String {
        format!("{}{}.do?{}&{}", self.instance, table, self.api, sysparm)
    }

    /// GETs `table` with the given sysparm query string.
    ///
    /// Transport failures are errors; envelope problems are an [`Outcome::Failure`].
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, table: &str, sysparm: &str) -> Result<Outcome<Payload>> {
        let url = self.url(table, sysparm);
        debug!("GET records from {}...", url);

        let options = RequestOptions::new()
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .timeout(self.timeout);
        let response = self.session.get(&url, options).await?;
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        Ok(interpret_get(&body))
    }

    /// POSTs `data` as JSON to `table` with the given sysparm query string.
    ///
    /// Succeeds only when every returned record is free of an `__error` marker.
    #[tracing::instrument(skip(self, data))]
    pub async fn post<T>(&self, table: &str, sysparm: &str, data: &T) -> Result<Outcome<Vec<Record>>>
    where
        T: Serialize + ?Sized,
    {
        let url = self.url(table, sysparm);
        let payload = serde_json::to_string(data).context("Failed to serialize request payload")?;
        debug!("POST {} bytes to {}...", payload.len(), url);

        let options = RequestOptions::new()
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .timeout(self.timeout);
        let response = self.session.post(&url, options).await?;
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        Ok(interpret_post(&body))
    }
}
