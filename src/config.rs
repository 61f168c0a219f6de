use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com";
pub const DEFAULT_AUTH_URL: &str = "https://auth.tesla.com/oauth2/v3/token";
pub const DEFAULT_SCOPES: &str =
    "vehicle_device_data vehicle_commands vehicle_telemetry energy_device_data";

/// Upper bound for TOKEN_SAFETY_MARGIN (one day)
pub const MAX_TOKEN_SAFETY_MARGIN: u64 = 86_400;

/// Tesla MCP - Fleet API tools for AI assistants
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the MCP tool server on stdin/stdout (default)
    Mcp,

    /// Run the REST gateway
    Serve,

    /// Print a summary of all vehicles and solar systems
    Status,

    /// List vehicles
    Vehicles,

    /// Show a single vehicle
    Vehicle { vehicle_id: String },

    /// Send a command to a vehicle
    Command {
        vehicle_id: String,
        command: String,
        /// JSON object of command parameters
        #[arg(long)]
        params: Option<String>,
    },

    /// Show live status of a solar system
    Solar { site_id: String },

    /// Show solar system history
    History {
        site_id: String,
        /// day, week, month or year
        #[arg(long, default_value = "day")]
        period: String,
    },

    /// Encrypt client credentials into the credential file
    EncryptCredentials,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Fleet API base URL
    #[arg(long, env = "TESLA_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub api_base: String,

    /// OAuth2 token endpoint
    #[arg(long, env = "TESLA_AUTH_URL", default_value = DEFAULT_AUTH_URL, global = true)]
    pub auth_url: String,

    /// Encrypted client credential file
    #[arg(long, env = "TESLA_CREDENTIALS_FILE", default_value = "credentials.enc", global = true)]
    pub credentials_file: String,

    /// File holding the current refresh token
    #[arg(long, env = "TESLA_REFRESH_TOKEN_FILE", default_value = "~/.tesla-mcp/refresh_token", global = true)]
    pub refresh_token_file: String,

    /// REST gateway host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// REST gateway port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000", global = true)]
    pub port: u16,

    /// API key required by the REST gateway
    #[arg(short = 'k', long, env = "SERVER_API_KEY", global = true)]
    pub api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    /// HTTP max retries
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3", global = true)]
    pub http_retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Vendor endpoints
    pub api_base_url: String,
    pub auth_url: String,
    pub scopes: String,

    // Credentials
    pub encryption_key: Option<String>,
    pub credentials_file: PathBuf,
    pub refresh_token_file: PathBuf,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Token lifecycle
    pub token_safety_margin: u64,
    pub token_exchange_timeout: u64,
    pub token_max_retries: u32,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // REST gateway
    pub server_host: String,
    pub server_port: u16,
    pub server_api_key: Option<String>,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    ///
    /// `.env` must already be loaded (see `main`) so clap sees its values.
    pub fn load(args: CliArgs) -> Result<Self> {
        let config = Config {
            api_base_url: args.api_base.trim_end_matches('/').to_string(),
            auth_url: args.auth_url,
            scopes: std::env::var("TESLA_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string()),

            encryption_key: non_empty_env("ENCRYPTION_KEY"),
            credentials_file: expand_tilde(&args.credentials_file),
            refresh_token_file: expand_tilde(&args.refresh_token_file),
            client_id: non_empty_env("TESLA_CLIENT_ID"),
            client_secret: non_empty_env("TESLA_CLIENT_SECRET"),

            token_safety_margin: env_or("TOKEN_SAFETY_MARGIN", 60),
            token_exchange_timeout: env_or("TOKEN_EXCHANGE_TIMEOUT", 15),
            token_max_retries: env_or("TOKEN_MAX_RETRIES", 3),

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 10),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,
            http_max_retries: args.http_retries,

            server_host: args.host,
            server_port: args.port,
            server_api_key: args.api_key.filter(|k| !k.is_empty()),

            log_level: args.log_level,
            log_format: parse_log_format(&std::env::var("LOG_FORMAT").unwrap_or_default()),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.api_base_url)
            .with_context(|| format!("TESLA_API_BASE is not a valid URL: {}", self.api_base_url))?;
        reqwest::Url::parse(&self.auth_url)
            .with_context(|| format!("TESLA_AUTH_URL is not a valid URL: {}", self.auth_url))?;

        if self.token_exchange_timeout == 0 {
            anyhow::bail!("TOKEN_EXCHANGE_TIMEOUT must be greater than zero");
        }

        if self.token_safety_margin > MAX_TOKEN_SAFETY_MARGIN {
            anyhow::bail!(
                "TOKEN_SAFETY_MARGIN must be at most {} seconds, got {}",
                MAX_TOKEN_SAFETY_MARGIN,
                self.token_safety_margin
            );
        }

        Ok(())
    }

    pub fn token_exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.token_exchange_timeout)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
