//! Per-table CRUD operations over [`SnowClient`].

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};

use crate::client::{Failure, Outcome, Payload, Record, SnowClient, json_kind};

/// Raised when `insert_multiple` is handed something other than a list.
#[derive(Debug)]
pub struct InvalidRecordsError {
    pub found: &'static str,
}

impl std::fmt::Display for InvalidRecordsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid type. insert_multiple requires list of records, found {}",
            self.found
        )
    }
}

impl std::error::Error for InvalidRecordsError {}

/// Handle bound to one table of one client.
///
/// Operations only shape the sysparm query and payload. The client's result
/// comes back unchanged, except for the typed views `get` and `get_keys` take
/// of it.
#[derive(Debug, Clone)]
pub struct Table<'c> {
    name: String,
    client: &'c SnowClient,
}

impl<'c> Table<'c> {
    /// Binds `name` to `client`. [`SnowClient::table`] is the usual way in.
    pub fn new(name: impl Into<String>, client: &'c SnowClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Name of the remote table, as used in the `<table>.do` path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches one record by `sys_id`. An empty result is [`Failure::NotFound`].
    #[tracing::instrument(skip(self), fields(table = %self.name))]
    pub async fn get(&self, sys_id: &str) -> Result<Outcome<Record>> {
        // sysparm_action is optional for a lookup by id
        let sysparm = format!("sysparm_sys_id={}", sys_id);
        let outcome = self.client.get(&self.name, &sysparm).await?;

        Ok(outcome.and_then(|payload| match payload {
            Payload::Records(records) => match records.into_iter().next() {
                Some(Value::Object(record)) => Outcome::Success(record),
                Some(other) => Outcome::Failure(Failure::UnexpectedShape(format!(
                    "record is {}",
                    json_kind(&other)
                ))),
                None => Outcome::Failure(Failure::NotFound),
            },
            Payload::Raw(value) => Outcome::Failure(Failure::UnexpectedShape(format!(
                "expected records, got {}",
                json_kind(&value)
            ))),
        }))
    }

    /// Returns the `sys_id` of every record matching the encoded query.
    #[tracing::instrument(skip(self), fields(table = %self.name))]
    pub async fn get_keys(&self, query: &str) -> Result<Outcome<Vec<String>>> {
        let sysparm = format!("sysparm_action=getKeys&sysparm_query={}", query);
        let outcome = self.client.get(&self.name, &sysparm).await?;

        Ok(outcome.and_then(|payload| match payload {
            Payload::Records(records) => keys_from_records(records),
            Payload::Raw(value) => Outcome::Failure(Failure::UnexpectedShape(format!(
                "expected records, got {}",
                json_kind(&value)
            ))),
        }))
    }

    /// Returns every record matching the encoded query, as the client decoded it.
    #[tracing::instrument(skip(self), fields(table = %self.name))]
    pub async fn get_records(&self, query: &str) -> Result<Outcome<Payload>> {
        let sysparm = format!("sysparm_action=getRecords&sysparm_query={}", query);
        self.client.get(&self.name, &sysparm).await
    }

    /// Creates one record.
    #[tracing::instrument(skip(self, data), fields(table = %self.name))]
    pub async fn insert<T>(&self, data: &T) -> Result<Outcome<Vec<Record>>>
    where
        T: Serialize + ?Sized,
    {
        self.client
            .post(&self.name, "sysparm_action=insert", data)
            .await
    }

    /// Creates several records in one request, sent as `{"records": [...]}`.
    ///
    /// `data` must serialize to a JSON array; anything else fails with
    /// [`InvalidRecordsError`] before a request is made.
    #[tracing::instrument(skip(self, data), fields(table = %self.name))]
    pub async fn insert_multiple<T>(&self, data: &T) -> Result<Outcome<Vec<Record>>>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(data).context("Failed to serialize records")?;
        let records = match value {
            Value::Array(records) => records,
            other => {
                return Err(InvalidRecordsError {
                    found: json_kind(&other),
                }
                .into());
            }
        };

        let payload = json!({ "records": records });
        self.client
            .post(&self.name, "sysparm_action=insertMultiple", &payload)
            .await
    }

    /// Applies `data` to every record matching the encoded query.
    #[tracing::instrument(skip(self, data), fields(table = %self.name))]
    pub async fn update<T>(&self, data: &T, query: &str) -> Result<Outcome<Vec<Record>>>
    where
        T: Serialize + ?Sized,
    {
        let sysparm = format!("sysparm_action=update&sysparm_query={}", query);
        self.client.post(&self.name, &sysparm, data).await
    }

    /// Deletes one record by `sys_id`.
    #[tracing::instrument(skip(self), fields(table = %self.name))]
    pub async fn delete(&self, sys_id: &str) -> Result<Outcome<Vec<Record>>> {
        let payload = json!({ "sysparm_sys_id": sys_id });
        self.client
            .post(&self.name, "sysparm_action=deleteRecord", &payload)
            .await
    }

    /// Deletes every record matching the encoded query.
    #[tracing::instrument(skip(self), fields(table = %self.name))]
    pub async fn delete_multiple(&self, query: &str) -> Result<Outcome<Vec<Record>>> {
        let payload = json!({ "sysparm_query": query });
        self.client
            .post(&self.name, "sysparm_action=deleteMultiple", &payload)
            .await
    }
}

/// Flattens a getKeys `records` list into ids. Entries are either id strings
/// (possibly comma separated) or records carrying a `sys_id`.
fn keys_from_records(records: Vec<Value>) -> Outcome<Vec<String>> {
    let mut keys = Vec::with_capacity(records.len());
    for record in records {
        match record {
            Value::String(ids) => keys.extend(
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            ),
            Value::Object(record) => match record.get("sys_id").and_then(Value::as_str) {
                Some(id) => keys.push(id.to_string()),
                None => {
                    return Outcome::Failure(Failure::UnexpectedShape(
                        "record without sys_id".to_string(),
                    ));
                }
            },
            other => {
                return Outcome::Failure(Failure::UnexpectedShape(format!(
                    "key is {}",
                    json_kind(&other)
                )));
            }
        }
    }
    Outcome::Success(keys)
}
