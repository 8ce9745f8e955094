//! Interpretation of the JSON envelopes returned by the legacy JSON API.
//!
//! Envelope problems are not errors: they come back as [`Outcome::Failure`]
//! and are reported on the log stream. Only transport failures travel through
//! `anyhow::Error`.

use log::error;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One row of a remote table.
pub type Record = Map<String, Value>;

/// Why a response carried no usable result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The body did not decode as JSON.
    NotJson,
    /// The service answered with an `{"error": ..., "reason": ...}` envelope.
    Request {
        error: String,
        reason: Option<String>,
    },
    /// A record in a POST response carried an `__error` marker.
    Record { message: String },
    /// A POST response without a `records` list.
    MissingRecords,
    /// A single-record lookup found nothing.
    NotFound,
    /// The JSON decoded but is not shaped as expected.
    UnexpectedShape(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::NotJson => write!(f, "Request response is not Json"),
            Failure::Request {
                error,
                reason: Some(reason),
            } => write!(f, "Request Error: {} ({})", error, reason),
            Failure::Request { error, reason: None } => write!(f, "Request Error: {}", error),
            Failure::Record { message } => write!(f, "Record Error: {}", message),
            Failure::MissingRecords => write!(f, "Response carries no records"),
            Failure::NotFound => write!(f, "No matching record"),
            Failure::UnexpectedShape(msg) => write!(f, "Unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for Failure {}

/// Either a usable result or the [`Failure`] explaining its absence.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Outcome<T> {
    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True for [`Outcome::Failure`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Consumes the outcome, keeping the success value if any.
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// Borrows the failure, if this is one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// Transforms the success value, leaving a failure untouched.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(failure) => Outcome::Failure(failure),
        }
    }

    /// Chains a step that may itself fail.
    pub fn and_then<U, F: FnOnce(T) -> Outcome<U>>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(value) => f(value),
            Outcome::Failure(failure) => Outcome::Failure(failure),
        }
    }

    /// Converts into a `Result` so `?` can be used on the failure.
    pub fn into_result(self) -> Result<T, Failure> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}

/// Successful GET body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The `records` list, in the order the service sent it.
    Records(Vec<Value>),
    /// Any body that is not a records envelope, unchanged.
    Raw(Value),
}

impl Payload {
    /// Borrows the `records` list, if the body was a records envelope.
    pub fn records(&self) -> Option<&[Value]> {
        match self {
            Payload::Records(records) => Some(records),
            Payload::Raw(_) => None,
        }
    }

    /// Consumes the payload, keeping the `records` list if there is one.
    pub fn into_records(self) -> Option<Vec<Value>> {
        match self {
            Payload::Records(records) => Some(records),
            Payload::Raw(_) => None,
        }
    }

    /// The payload as plain JSON: the records as an array, or the raw body.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Records(records) => Value::Array(records),
            Payload::Raw(value) => value,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Records(records) => records.serialize(serializer),
            Payload::Raw(value) => value.serialize(serializer),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn decode(op: &str, body: &str) -> Option<Value> {
    match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("{}: Request Error: Request response is not Json ({})", op, e);
            None
        }
    }
}

fn request_error(body: &Map<String, Value>) -> Option<Failure> {
    let error = body.get("error")?;
    let error = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Failure::Request { error, reason })
}

fn record_error(marker: &Value) -> String {
    match marker {
        Value::String(s) => s.clone(),
        Value::Object(o) => match o.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => marker.to_string(),
        },
        other => other.to_string(),
    }
}

/// Interprets a GET body.
///
/// An `error` key wins over everything else; a `records` list is returned as
/// is; any other JSON passes through as [`Payload::Raw`].
pub fn interpret_get(body: &str) -> Outcome<Payload> {
    let Some(value) = decode("get", body) else {
        return Outcome::Failure(Failure::NotJson);
    };

    let mut body = match value {
        Value::Object(body) => body,
        other => return Outcome::Success(Payload::Raw(other)),
    };

    if let Some(failure) = request_error(&body) {
        error!("get: {}", failure);
        return Outcome::Failure(failure);
    }

    match body.remove("records") {
        Some(Value::Array(records)) => Outcome::Success(Payload::Records(records)),
        Some(other) => {
            let failure = Failure::UnexpectedShape(format!("records is {}", json_kind(&other)));
            error!("get: {}", failure);
            Outcome::Failure(failure)
        }
        None => Outcome::Success(Payload::Raw(Value::Object(body))),
    }
}

/// Interprets a POST body.
///
/// Only a `records` list free of `__error` markers is a success. One marked
/// record fails the whole batch.
pub fn interpret_post(body: &str) -> Outcome<Vec<Record>> {
    let Some(value) = decode("post", body) else {
        return Outcome::Failure(Failure::NotJson);
    };

    let mut body = match value {
        Value::Object(body) => body,
        other => {
            let failure = Failure::UnexpectedShape(format!("body is {}", json_kind(&other)));
            error!("post: {}", failure);
            return Outcome::Failure(failure);
        }
    };

    let records = match body.remove("records") {
        Some(Value::Array(records)) => records,
        Some(other) => {
            let failure = Failure::UnexpectedShape(format!("records is {}", json_kind(&other)));
            error!("post: {}", failure);
            return Outcome::Failure(failure);
        }
        None => {
            if let Some(failure) = request_error(&body) {
                error!("post: {}", failure);
                return Outcome::Failure(failure);
            }
            return Outcome::Failure(Failure::MissingRecords);
        }
    };

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        match record {
            Value::Object(record) => {
                if let Some(marker) = record.get("__error") {
                    let failure = Failure::Record {
                        message: record_error(marker),
                    };
                    error!("{}", failure);
                    return Outcome::Failure(failure);
                }
                out.push(record);
            }
            other => {
                let failure =
                    Failure::UnexpectedShape(format!("record is {}", json_kind(&other)));
                error!("post: {}", failure);
                return Outcome::Failure(failure);
            }
        }
    }
    Outcome::Success(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_records_in_order() {
        let outcome = interpret_get(r#"{"records": [{"sys_id": "a"}, {"sys_id": "b"}, "c"]}"#);
        assert_eq!(
            outcome,
            Outcome::Success(Payload::Records(vec![
                json!({"sys_id": "a"}),
                json!({"sys_id": "b"}),
                json!("c"),
            ]))
        );
    }

    #[test]
    fn test_get_empty_records_is_success() {
        let outcome = interpret_get(r#"{"records": []}"#);
        assert_eq!(outcome, Outcome::Success(Payload::Records(vec![])));
    }

    #[test]
    fn test_get_error_envelope() {
        let outcome =
            interpret_get(r#"{"error": "Invalid sysparm_action", "reason": "Some reason"}"#);
        assert_eq!(
            outcome.failure(),
            Some(&Failure::Request {
                error: "Invalid sysparm_action".to_string(),
                reason: Some("Some reason".to_string()),
            })
        );
    }

    #[test]
    fn test_get_error_wins_over_records() {
        let outcome = interpret_get(r#"{"error": "boom", "records": [{"sys_id": "a"}]}"#);
        assert!(matches!(outcome, Outcome::Failure(Failure::Request { .. })));
    }

    #[test]
    fn test_get_bad_json() {
        assert_eq!(interpret_get(r#"{"":"":}"#), Outcome::Failure(Failure::NotJson));
        assert_eq!(interpret_get(""), Outcome::Failure(Failure::NotJson));
    }

    #[test]
    fn test_get_passes_through_other_objects() {
        let outcome = interpret_get(r#"{"status": "pass"}"#);
        assert_eq!(outcome, Outcome::Success(Payload::Raw(json!({"status": "pass"}))));
    }

    #[test]
    fn test_payload_serializes_as_plain_json() {
        let records = Payload::Records(vec![json!({"sys_id": "a"})]);
        assert_eq!(serde_json::to_value(&records).unwrap(), json!([{"sys_id": "a"}]));

        let raw = Payload::Raw(json!({"status": "pass"}));
        assert_eq!(serde_json::to_string(&raw).unwrap(), r#"{"status":"pass"}"#);
        assert_eq!(raw.into_value(), json!({"status": "pass"}));
    }

    #[test]
    fn test_get_passes_through_non_objects() {
        let outcome = interpret_get("[1, 2]");
        assert_eq!(outcome, Outcome::Success(Payload::Raw(json!([1, 2]))));
    }

    #[test]
    fn test_get_records_not_a_list() {
        let outcome = interpret_get(r#"{"records": "nope"}"#);
        assert!(matches!(
            outcome,
            Outcome::Failure(Failure::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_post_records() {
        let outcome = interpret_post(
            r#"{"records": [{"sys_id": "a", "short_description": "x"}, {"sys_id": "b"}]}"#,
        );
        let records = outcome.success().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["short_description"], "x");
        assert_eq!(records[1]["sys_id"], "b");
    }

    #[test]
    fn test_post_one_record_error_fails_batch() {
        let outcome = interpret_post(
            r#"{"records": [
                {"sys_id": "a"},
                {"__error": {"message": "Insert aborted", "reason": "Business rule"}},
                {"sys_id": "c"}
            ]}"#,
        );
        assert_eq!(
            outcome,
            Outcome::Failure(Failure::Record {
                message: "Insert aborted".to_string()
            })
        );
    }

    #[test]
    fn test_post_record_error_without_message() {
        let outcome = interpret_post(r#"{"records": [{"__error": "denied"}]}"#);
        assert_eq!(
            outcome.failure(),
            Some(&Failure::Record {
                message: "denied".to_string()
            })
        );
    }

    #[test]
    fn test_post_error_envelope() {
        let outcome = interpret_post(
            r#"{"reason": "No data", "error": "Request JSON object for insert cannot be null."}"#,
        );
        assert_eq!(
            outcome.failure(),
            Some(&Failure::Request {
                error: "Request JSON object for insert cannot be null.".to_string(),
                reason: Some("No data".to_string()),
            })
        );
    }

    #[test]
    fn test_post_without_records_is_never_success() {
        let outcome = interpret_post(r#"{"status": "pass"}"#);
        assert_eq!(outcome, Outcome::Failure(Failure::MissingRecords));
    }

    #[test]
    fn test_post_bad_json() {
        assert_eq!(interpret_post("not json"), Outcome::Failure(Failure::NotJson));
    }

    #[test]
    fn test_post_non_object_record() {
        let outcome = interpret_post(r#"{"records": ["a"]}"#);
        assert!(matches!(
            outcome,
            Outcome::Failure(Failure::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_outcome_combinators() {
        let ok: Outcome<i32> = Outcome::Success(2);
        assert!(ok.is_success());
        assert_eq!(ok.clone().map(|v| v * 2), Outcome::Success(4));
        assert_eq!(
            ok.and_then(|_| Outcome::<i32>::Failure(Failure::NotFound)),
            Outcome::Failure(Failure::NotFound)
        );

        let failed: Outcome<i32> = Outcome::Failure(Failure::NotJson);
        assert!(failed.is_failure());
        assert_eq!(failed.clone().into_result(), Err(Failure::NotJson));
        assert_eq!(failed.success(), None);
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::Request {
            error: "Invalid sysparm_action".to_string(),
            reason: Some("Some reason".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "Request Error: Invalid sysparm_action (Some reason)"
        );
        assert_eq!(
            Failure::Record {
                message: "bad".to_string()
            }
            .to_string(),
            "Record Error: bad"
        );
    }
}
