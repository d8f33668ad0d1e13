mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};
use ewerelay_api::{DeviceApiClient, DeviceStateSource, FieldSelection};
use ewerelay_core::config::{Config, ConfigValidator};
use ewerelay_gateway::server::device_filter;
use ewerelay_gateway::GatewayServer;

const DEFAULT_LOG_FILTER: &str = "ewerelay=info,tower_http=warn,warn";
const DEV_LOG_FILTER: &str = "ewerelay=debug,info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dev = matches!(cli.command, Some(Commands::Serve { dev: true, .. }));
    init_tracing(dev);

    // Handle ConfigSample immediately without loading config
    if let Some(Commands::ConfigSample { output }) = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| PathBuf::from("./ewerelay.sample.yaml"));
        Config::sample().save(&path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let config = Config::load(&cli.config_path)?;

    match cli.command {
        Some(Commands::ConfigSample { .. }) => {
            // Already handled
        }
        Some(Commands::CheckConfig) => handle_check_config(&config)?,
        Some(Commands::Fetch { token, region }) => handle_fetch(&config, &token, region).await?,
        Some(Commands::Serve { host, port, dev }) => handle_serve(config, host, port, dev).await?,
        None => handle_serve(config, None, None, false).await?,
    }

    Ok(())
}

fn init_tracing(dev: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if dev { DEV_LOG_FILTER } else { DEFAULT_LOG_FILTER })
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

async fn handle_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    println!("ewerelay starting");
    println!("---------------------------------");
    println!("  listen:   {}", config.server.bind_addr());
    println!("  push:     {}", config.server.ws_path);
    println!("  frontend: {}", config.server.frontend_url);
    println!("  region:   {}", config.oauth.default_region);
    println!(
        "  polling:  {}",
        match config.poll.interval_secs {
            0 => "off".to_string(),
            secs => format!("every {}s", secs),
        }
    );
    println!("  mode:     {}", if dev { "development" } else { "production" });
    println!("---------------------------------");
    println!();

    if !config.server.cookie_secure && !config.server.frontend_url.starts_with("http://localhost")
    {
        tracing::warn!("Session cookie is not marked Secure; enable server.cookie_secure behind HTTPS");
    }

    let server = GatewayServer::new(config)?;
    server.start().await
}

fn handle_check_config(config: &Config) -> Result<()> {
    ConfigValidator::validate(config)?;
    let filter = device_filter(&config.device)?;

    println!("Configuration OK");
    println!("  client id:     {}", config.oauth.client_id);
    println!("  redirect uri:  {}", config.oauth.redirect_uri);
    println!("  token url:     {}", config.oauth.token_url);
    println!("  api base:      {}", config.device.api_base);
    println!("  device:        {:?}", filter);
    println!("  fields:        {}", config.device.fields.join(", "));
    println!("  required:      {}", config.device.required_fields.join(", "));
    Ok(())
}

async fn handle_fetch(config: &Config, token: &str, region: Option<String>) -> Result<()> {
    let filter = device_filter(&config.device)?;
    let region = region.unwrap_or_else(|| config.oauth.default_region.clone());
    let client = DeviceApiClient::new(
        config.device.api_base.clone(),
        FieldSelection::new(
            config.device.fields.clone(),
            config.device.required_fields.clone(),
        ),
        Duration::from_secs(config.device.request_timeout_secs),
    )?;

    info!("Fetching {:?} in region {}", filter, region);
    let state = client
        .fetch_device_state(token, &region, &filter)
        .await
        .with_context(|| format!("fetch failed ({})", region))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
