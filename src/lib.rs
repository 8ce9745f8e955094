pub mod client;
pub mod config;
pub mod http;
pub mod table;

pub use client::{Failure, Outcome, Payload, Record, SnowClient};
pub use config::ClientConfig;
pub use http::{HttpStatusError, MaxRetriesError, RetryPolicy, Session};
pub use table::{InvalidRecordsError, Table};
