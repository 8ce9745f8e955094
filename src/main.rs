use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use snowrac::{ClientConfig, Outcome, SnowClient};
use std::process::ExitCode;
use std::time::Duration;

/// snowrac - ServiceNow table client with automatic retry
///
/// Talks to the legacy JSON API of a ServiceNow instance. Requests failing with
/// 502/503/504, timeouts or dropped connections are retried with backoff.
///
/// Examples:
///   snowrac get-keys incident "active=true"
///   snowrac insert incident '{"short_description": "Printer on fire"}'
#[derive(Parser, Debug)]
#[command(author, version = env!("SNOWRAC_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Instance name, as in <hostname>.service-now.com
    #[arg(long, env = "SNOW_HOSTNAME")]
    pub hostname: Option<String>,

    /// Full instance URL (overrides --hostname)
    #[arg(long = "instance-url", env = "SNOW_INSTANCE_URL", value_name = "URL")]
    pub instance_url: Option<String>,

    #[arg(long, short = 'u', env = "SNOW_USERNAME")]
    pub username: String,

    #[arg(long, short = 'p', env = "SNOW_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "SNOW_TIMEOUT", default_value_t = 60)]
    pub timeout: u64,

    /// API version marker placed in every query string
    #[arg(long, env = "SNOW_API", default_value = "JSONv2")]
    pub api: String,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fetch one record by sys_id
    Get { table: String, sys_id: String },

    /// List the sys_id of records matching an encoded query
    GetKeys { table: String, query: String },

    /// Fetch records matching an encoded query
    GetRecords { table: String, query: String },

    /// Create a record from a JSON object
    Insert { table: String, data: String },

    /// Create records from a JSON array of objects
    InsertMultiple { table: String, data: String },

    /// Apply a JSON object to every record matching an encoded query
    Update {
        table: String,
        query: String,
        data: String,
    },

    /// Delete one record by sys_id
    Delete { table: String, sys_id: String },

    /// Delete every record matching an encoded query
    DeleteMultiple { table: String, query: String },
}

impl Cli {
    fn config(&self) -> Result<ClientConfig> {
        let hostname = match (&self.hostname, &self.instance_url) {
            (Some(hostname), _) => hostname.clone(),
            (None, Some(_)) => String::new(),
            (None, None) => {
                return Err(anyhow!(
                    "Either --hostname (SNOW_HOSTNAME) or --instance-url (SNOW_INSTANCE_URL) is required"
                ));
            }
        };

        let mut config = ClientConfig::new(hostname, &self.username, &self.password)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_api(&self.api);
        if let Some(url) = &self.instance_url {
            config = config.with_instance_url(url);
        }
        Ok(config)
    }
}

fn parse_json(input: &str) -> Result<Value> {
    serde_json::from_str(input).with_context(|| format!("Invalid JSON argument: {}", input))
}

fn report<T: Serialize>(outcome: Outcome<T>) -> Result<ExitCode> {
    match outcome {
        Outcome::Success(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failure(failure) => {
            eprintln!("Error: {}", failure);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let client = SnowClient::new(&cli.config()?)?;

    match cli.command {
        Commands::Get { table, sys_id } => report(client.table(table).get(&sys_id).await?),
        Commands::GetKeys { table, query } => {
            report(client.table(table).get_keys(&query).await?)
        }
        Commands::GetRecords { table, query } => {
            report(client.table(table).get_records(&query).await?)
        }
        Commands::Insert { table, data } => {
            let data = parse_json(&data)?;
            report(client.table(table).insert(&data).await?)
        }
        Commands::InsertMultiple { table, data } => {
            let data = parse_json(&data)?;
            report(client.table(table).insert_multiple(&data).await?)
        }
        Commands::Update { table, query, data } => {
            let data = parse_json(&data)?;
            report(client.table(table).update(&data, &query).await?)
        }
        Commands::Delete { table, sys_id } => {
            report(client.table(table).delete(&sys_id).await?)
        }
        Commands::DeleteMultiple { table, query } => {
            report(client.table(table).delete_multiple(&query).await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    run(cli).await
}
