use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::Path;

use tesla_mcp::api::FleetApi;
use tesla_mcp::auth::{AuthError, TokenManager};
use tesla_mcp::config::{Cli, Command, Config, LogFormat};
use tesla_mcp::http_client::TeslaHttpClient;
use tesla_mcp::{mcp, routes, setup};

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so clap's env fallbacks see it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.args)?;
    config.validate()?;

    init_logging(&config);

    match cli.command.unwrap_or(Command::Mcp) {
        Command::EncryptCredentials => setup::run_encrypt_credentials(&config, Path::new(".env")),
        Command::Mcp => {
            let (token_manager, api) = build_api(&config)?;
            probe_credentials(&token_manager).await?;
            tracing::info!("Serving MCP on stdio");
            mcp::serve_stdio(api).await.context("MCP transport failed")
        }
        Command::Serve => {
            let (token_manager, api) = build_api(&config)?;
            probe_credentials(&token_manager).await?;
            serve_rest(&config, token_manager, api).await
        }
        command => {
            let (_, api) = build_api(&config)?;
            run_cli_command(&api, command).await
        }
    }
}

/// Log to stderr so stdout stays free for the MCP transport
fn init_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn build_api(config: &Config) -> Result<(TokenManager, FleetApi)> {
    let token_manager = TokenManager::from_config(config)?;
    let client = TeslaHttpClient::new(
        token_manager.clone(),
        config.api_base_url.clone(),
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
        config.http_max_retries,
    )?;
    tracing::debug!("HTTP client initialized for {}", config.api_base_url);

    Ok((token_manager, FleetApi::new(client)))
}

/// Fetch a token once at startup.
///
/// Missing credentials abort startup; anything else may recover later.
async fn probe_credentials(token_manager: &TokenManager) -> Result<()> {
    match token_manager.get_valid_token().await {
        Ok(_) => {
            tracing::info!("Authentication successful");
            Ok(())
        }
        Err(AuthError::Configuration(msg)) => {
            tracing::error!("Credentials are not configured: {}", msg);
            anyhow::bail!("Startup failed: {}", msg)
        }
        Err(e) => {
            tracing::error!("Authentication failed: {}", e);
            tracing::warn!("Starting anyway; tool calls will fail until a token can be obtained");
            Ok(())
        }
    }
}

async fn serve_rest(config: &Config, token_manager: TokenManager, api: FleetApi) -> Result<()> {
    let state = routes::AppState {
        api,
        token_manager,
        api_key: config.server_api_key.clone(),
    };
    if state.api_key.is_none() {
        tracing::warn!("SERVER_API_KEY not set; REST gateway accepts unauthenticated requests");
    }

    let app = routes::build_app(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn run_cli_command(api: &FleetApi, command: Command) -> Result<()> {
    let output = match command {
        Command::Status => serde_json::to_value(api.get_system_summary().await?)?,
        Command::Vehicles => Value::Array(api.list_vehicles().await?),
        Command::Vehicle { vehicle_id } => api.get_vehicle(&vehicle_id).await?,
        Command::Command {
            vehicle_id,
            command,
            params,
        } => {
            let parameters = parse_params(params.as_deref())?;
            api.send_vehicle_command(&vehicle_id, &command, &parameters)
                .await?
        }
        Command::Solar { site_id } => api.get_solar_status(&site_id).await?,
        Command::History { site_id, period } => {
            api.get_solar_history(&site_id, Some(period.as_str())).await?
        }
        Command::Mcp | Command::Serve | Command::EncryptCredentials => {
            anyhow::bail!("not a one-shot command")
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_params(params: Option<&str>) -> Result<Value> {
    match params {
        None => Ok(Value::Object(Default::default())),
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
            if !value.is_object() {
                anyhow::bail!("--params must be a JSON object");
            }
            Ok(value)
        }
    }
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
