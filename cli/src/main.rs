//! Command-line access to the resource API: generic CRUD verbs, asset
//! publishing and cache maintenance.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use resapi_core::{Client, ClientConfig, Filters, Response, SqliteCache, UreqTransport};
use serde_json::{json, Value};
use tracing::{error, info};

mod publish;
mod trc;

use crate::publish::{Published, Publisher};
use crate::trc::Trc;

#[derive(Parser)]
#[command(version, about = "Client for a versioned JSON/HTTP resource API.")]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    /// Log span enter/exit events and full targets.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Connection {
    /// API host, e.g. https://api.example.com
    #[arg(long, env = "RESAPI_HOST", global = true)]
    host: Option<String>,

    /// API version; requests go to {host}/v{version}.
    #[arg(long = "api-version", env = "RESAPI_VERSION", default_value = "1", global = true)]
    api_version: String,

    #[arg(long, env = "RESAPI_CLIENT_ID", global = true)]
    client_id: Option<String>,

    #[arg(long, env = "RESAPI_CLIENT_SECRET", hide_env_values = true, global = true)]
    client_secret: Option<String>,

    /// SQLite file used to cache GET responses. Caching is off when unset.
    #[arg(long, env = "RESAPI_CACHE_PATH", global = true)]
    cache_path: Option<PathBuf>,

    #[arg(long, env = "RESAPI_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// List a resource, optionally filtered by key=value pairs.
    Index {
        resource: String,
        #[arg(value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Fetch one item.
    Get { resource: String, id: String },

    /// Create an item from a JSON document.
    Create {
        resource: String,
        #[arg(value_parser = parse_json)]
        data: Value,
    },

    /// Update an item with a JSON document.
    Update {
        resource: String,
        id: String,
        #[arg(value_parser = parse_json)]
        data: Value,
    },

    /// Delete an item.
    Delete {
        resource: String,
        id: String,
        /// Optional JSON body sent with the delete.
        #[arg(long, value_parser = parse_json)]
        data: Option<Value>,
    },

    /// Upload every asset in a directory to the media resource.
    Publish {
        dir: PathBuf,
        #[arg(long, default_value = "hackathon")]
        project: String,
        #[arg(long, default_value = "js")]
        extension: String,
    },

    /// Maintain the response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Create the cache table and its expiry index.
    Init,
    /// Delete expired entries.
    Purge,
}

impl Connection {
    fn config(&self) -> Result<ClientConfig> {
        let host = self.host.clone().context("--host or RESAPI_HOST is required")?;
        let client_id = self.client_id.clone().context("--client-id or RESAPI_CLIENT_ID is required")?;
        let client_secret = self
            .client_secret
            .clone()
            .context("--client-secret or RESAPI_CLIENT_SECRET is required")?;
        Ok(ClientConfig::new(host, self.api_version.clone(), client_id, client_secret)?)
    }

    fn cache(&self) -> Result<Option<SqliteCache>> {
        self.cache_path
            .as_deref()
            .map(|path| {
                SqliteCache::open(path).with_context(|| format!("failed to open cache at {}", path.display()))
            })
            .transpose()
    }

    fn client(&self) -> Result<Client> {
        let transport = UreqTransport::new(Duration::from_secs(self.timeout_secs));
        let client = Client::new(self.config()?, transport)?;
        Ok(match self.cache()? {
            Some(cache) => client.with_cache(Arc::new(cache)),
            None => client,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = Trc::default().verbose(cli.verbose).init() {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let conn = &cli.connection;
    let response = match cli.command {
        Command::Index { resource, filters } => {
            let filters: Filters = filters.into_iter().collect();
            conn.client()?.index(&resource, &filters)?
        }
        Command::Get { resource, id } => conn.client()?.get(&resource, &id)?,
        Command::Create { resource, data } => conn.client()?.post(&resource, &data)?,
        Command::Update { resource, id, data } => conn.client()?.put(&resource, &id, &data)?,
        Command::Delete { resource, id, data } => match data {
            Some(data) => conn.client()?.delete_with_body(&resource, &id, &data)?,
            None => conn.client()?.delete(&resource, &id)?,
        },
        Command::Publish {
            dir,
            project,
            extension,
        } => {
            let client = conn.client()?;
            let published = Publisher::new(&client, project)
                .extension(extension)
                .publish_dir(&dir)
                .context("publish failed")?;
            for item in &published {
                match item {
                    Published::Updated { path, id } => println!("updated {} ({id})", path.display()),
                    Published::Created { path, id } => println!("created {} ({id})", path.display()),
                }
            }
            info!(count = published.len(), "publish complete");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Cache { action } => {
            let cache = conn.cache()?.context("--cache-path or RESAPI_CACHE_PATH is required")?;
            match action {
                CacheAction::Init => {
                    cache.ensure_indexes()?;
                    info!("cache ready");
                }
                CacheAction::Purge => {
                    let removed = cache.purge_expired()?;
                    info!(removed, "purged expired entries");
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!("{}", serde_json::to_string_pretty(&render(&response))?);
    Ok(if response.http_code() < 400 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn render(response: &Response) -> Value {
    json!({
        "http_code": response.http_code(),
        "headers": response.headers(),
        "body": response.body(),
    })
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty filter key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {e}"))
}
