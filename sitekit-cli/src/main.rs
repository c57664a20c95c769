mod paths;
mod requests;

use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde_json::Value;
use serde_json::json;
use simplelog::Config;
use simplelog::LevelFilter;
use simplelog::WriteLogger;
use sitekit_data::SiteKitClient;
use sitekit_data::api::BatchConfig;
use sitekit_data::api::DataRequest;
use sitekit_data::api::RequestType;
use sitekit_data::cache::SqliteCache;
use sitekit_data::error::Error;
use sitekit_data::transport::Credentials;
use sitekit_data::transport::HttpTransport;

use crate::requests::Sink;

/// Query the Site Kit data endpoints of a WordPress site.
#[derive(Debug, Parser)]
#[command(name = "sitekit", version)]
struct Cli {
    /// Site URL, e.g. https://example.com
    #[arg(long, env = "SITEKIT_URL")]
    site_url: String,

    /// REST nonce for cookie-authenticated sessions.
    #[arg(long, env = "SITEKIT_NONCE", conflicts_with = "username")]
    nonce: Option<String>,

    /// WordPress user for application-password authentication.
    #[arg(long, env = "SITEKIT_USERNAME", requires = "app_password")]
    username: Option<String>,

    /// Application password for `--username`.
    #[arg(long, env = "SITEKIT_APP_PASSWORD", hide_env_values = true)]
    app_password: Option<String>,

    /// REST namespace of the plugin.
    #[arg(long, default_value = sitekit_data::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Date range applied to requests without one.
    #[arg(long, default_value = sitekit_data::api::DEFAULT_DATE_RANGE)]
    date_range: String,

    /// Response cache database. Defaults to the platform cache directory.
    #[arg(long, env = "SITEKIT_CACHE_DB")]
    cache_db: Option<PathBuf>,

    /// Keep responses in memory only.
    #[arg(long)]
    no_cache: bool,

    /// Ask the site to skip its own response cache.
    #[arg(long)]
    bypass_server_cache: bool,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Log file. Defaults to `latest.log` in the platform cache directory.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a file of requests through the batch endpoint.
    Fetch {
        /// JSON request file, or `-` for stdin.
        file: PathBuf,
    },
    /// Fetch a single datapoint.
    Get {
        #[arg(value_enum)]
        kind: Kind,
        identifier: String,
        datapoint: String,
        /// Query option as `name=value`; values are parsed as JSON when possible.
        #[arg(long = "data", value_parser = parse_option)]
        data: Vec<(String, Value)>,
        /// Max age of a cached answer in seconds.
        #[arg(long)]
        max_age: Option<u64>,
    },
    /// Write a datapoint.
    Set {
        #[arg(value_enum)]
        kind: Kind,
        identifier: String,
        datapoint: String,
        /// JSON payload.
        data: String,
    },
    /// Drop cached answers of a module or datapoint.
    Invalidate {
        #[arg(value_enum)]
        kind: Kind,
        identifier: String,
        datapoint: Option<String>,
    },
    /// Remove expired entries from the cache database.
    Gc,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Core,
    Modules,
}

impl From<Kind> for RequestType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Core => RequestType::Core,
            Kind::Modules => RequestType::Modules,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    SiteKit(#[from] Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache database error: {0}")]
    Cache(String),

    #[error("No cache directory available; pass --cache-db or --no-cache")]
    NoCacheDir,
}

fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn init_logging(cli: &Cli) {
    let path = match &cli.log_file {
        Some(path) => Some(path.clone()),
        None => paths::cache_dir().and_then(|dir| {
            fs::create_dir_all(&dir).ok()?;
            paths::rotate_logs(&dir);
            paths::log_file()
        }),
    };

    let Some(path) = path else {
        return;
    };

    match File::create(&path) {
        Ok(file) => {
            if let Err(e) = WriteLogger::init(cli.log_level, Config::default(), file) {
                eprintln!("Failed to initialize logger: {}", e);
            }
        }
        Err(e) => eprintln!("Failed to create log file {}: {}", path.display(), e),
    }
}

async fn build_client(cli: &Cli) -> Result<SiteKitClient, CliError> {
    let credentials = match (&cli.nonce, &cli.username, &cli.app_password) {
        (Some(nonce), _, _) => Credentials::Nonce(nonce.clone()),
        (None, Some(username), Some(password)) => Credentials::ApplicationPassword {
            username: username.clone(),
            password: password.clone(),
        },
        _ => Credentials::None,
    };

    let transport = HttpTransport::new(&cli.site_url)?
        .with_credentials(credentials)
        .with_timeout(Duration::from_secs(cli.timeout));

    let builder = SiteKitClient::builder()
        .transport(transport)
        .namespace(&cli.namespace)
        .date_range(&cli.date_range)
        .batch_config(BatchConfig::default().with_bypass_server_cache(cli.bypass_server_cache));

    if cli.no_cache {
        return Ok(builder.build());
    }

    let path = match &cli.cache_db {
        Some(path) => path.clone(),
        None => paths::cache_db().ok_or(CliError::NoCacheDir)?,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    log::info!("Using cache database {}", path.display());
    let cache = SqliteCache::open(&path)
        .await
        .map_err(|e| CliError::Cache(e.to_string()))?;

    Ok(builder.cache(cache).build())
}

fn read_input(file: &Path) -> Result<String, CliError> {
    if file.as_os_str() == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    } else {
        Ok(fs::read_to_string(file)?)
    }
}

async fn run(cli: Cli) -> Result<Value, CliError> {
    let client = build_client(&cli).await?;

    match cli.command {
        Command::Fetch { file } => {
            let entries = requests::parse(&read_input(&file)?)?;
            let sink = Sink::default();
            let batch = entries
                .into_iter()
                .map(|entry| entry.into_request(&sink))
                .collect();

            let completion = client.combined_get(batch).await?;

            let errors: serde_json::Map<String, Value> = completion
                .failed
                .iter()
                .filter_map(|key| {
                    let error = client.error_for(key)?;
                    Some((key.to_string(), serde_json::to_value(error).ok()?))
                })
                .collect();
            let results = match sink.lock() {
                Ok(results) => serde_json::to_value(&*results)?,
                Err(poisoned) => serde_json::to_value(&*poisoned.into_inner())?,
            };

            Ok(json!({
                "completion": completion,
                "results": results,
                "errors": errors,
                "notifications": client.notifications().kinds(),
            }))
        }
        Command::Get {
            kind,
            identifier,
            datapoint,
            data,
            max_age,
        } => {
            let mut request = DataRequest::new(kind.into(), identifier, datapoint);
            for (name, value) in data {
                request = request.with_data(name, value);
            }
            if let Some(seconds) = max_age {
                request = request.max_age(Duration::from_secs(seconds));
            }

            let response = client.get(request).await?;
            Ok(serde_json::to_value(response)?)
        }
        Command::Set {
            kind,
            identifier,
            datapoint,
            data,
        } => {
            let data: Value = serde_json::from_str(&data)?;
            Ok(client
                .set(kind.into(), &identifier, &datapoint, data)
                .await?)
        }
        Command::Invalidate {
            kind,
            identifier,
            datapoint,
        } => {
            let removed = client
                .invalidate_cache(kind.into(), &identifier, datapoint.as_deref())
                .await;
            Ok(json!({ "removed": removed }))
        }
        Command::Gc => {
            let removed = client.cache().gc_expired().await;
            Ok(json!({ "removed": removed }))
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            if matches!(&e, CliError::SiteKit(Error::Api(api)) if api.is_invalid_nonce()) {
                eprintln!("The REST nonce has expired; pass a fresh --nonce.");
            }
            std::process::exit(1);
        }
    }
}
