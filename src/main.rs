use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tcptap::cli::Cli;
use tcptap::config::{Config, LogFormat};
use tcptap::server::ProxyServer;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env().and_then(|mut config| {
        config.apply_cli(&cli);
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    // RUST_LOG wins over -v / --vv
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.color)
        .with_target(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting tcptap {}", tcptap::VERSION);

    let endpoints = config.resolve().await?;
    let settings = config.proxy_settings()?;

    if config.amqp {
        info!(
            requeue = config.nack_requeue,
            max_delay_ms = config.nack_delay_ms.unwrap_or(0),
            "AMQP ack -> nack rewriting enabled"
        );
    }
    if let Some(tls) = &settings.tls_unwrap {
        info!(server_name = tls.host(), "Unwrapping TLS");
    }

    let server = ProxyServer::bind(
        endpoints.local,
        endpoints.remote,
        endpoints.mirror,
        settings,
        config.inspect_options(),
    )
    .await
    .with_context(|| format!("Failed to open local port to listen on {}", endpoints.local))?;

    let listen_addr = server.local_addr()?;
    info!("Proxying from {} to {}", listen_addr, endpoints.remote);

    server.run().await;
    Ok(())
}
