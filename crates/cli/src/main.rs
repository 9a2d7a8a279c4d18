mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, PlatformKind};
use mtbridge_core::Platform;
use mtbridge_platforms_simulated::{SimulatedPlatform, SimulatedPlatformConfig};
use mtbridge_platforms_terminal::TerminalPlatform;
use mtbridge_server::{BridgeClient, BridgeServer};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mtbridge")]
#[command(about = "MetaTrader 5 bridge: JSON commands over ZeroMQ in, platform calls out")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./mtbridge.toml when present)
    #[arg(short, long, env = "MTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Append logs to this file as well as stdout
    #[arg(long, conflicts_with = "no_log_file")]
    log_file: Option<PathBuf>,

    /// Log to stdout only
    #[arg(long)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Serve {
        /// Port for the reply socket
        #[arg(short, long, env = "MTBRIDGE_PORT")]
        port: Option<u16>,

        /// Interface to bind
        #[arg(long)]
        bind: Option<String>,

        /// Use the in-memory simulator instead of a live terminal
        #[arg(long)]
        simulated: bool,

        /// Host of the MT5 terminal EA
        #[arg(long)]
        terminal_host: Option<String>,

        /// Port of the MT5 terminal EA
        #[arg(long)]
        terminal_port: Option<u16>,
    },

    /// Check that a running bridge answers ping
    Ping {
        /// Bridge endpoint
        #[arg(short, long, default_value = "tcp://127.0.0.1:18812")]
        endpoint: String,

        /// Seconds to wait for the reply
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(file) = cli.log_file {
        config.logging.file = Some(file);
    }
    if cli.no_log_file {
        config.logging.file = None;
    }

    match cli.command {
        Commands::Serve {
            port,
            bind,
            simulated,
            terminal_host,
            terminal_port,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if simulated {
                config.platform.kind = PlatformKind::Simulated;
            }
            if let Some(host) = terminal_host {
                config.platform.terminal.host = host;
            }
            if let Some(port) = terminal_port {
                config.platform.terminal.port = port;
            }

            init_tracing(&config.logging)?;
            serve(config).await?;
        }
        Commands::Ping { endpoint, timeout } => {
            config.logging.file = None;
            init_tracing(&config.logging)?;
            let mut client = BridgeClient::connect(&endpoint).await?;
            let ok = client.ping(Duration::from_secs(timeout)).await;
            client.close().await;
            if !ok {
                anyhow::bail!("Bridge at {} did not answer ping", endpoint);
            }
            println!("pong from {}", endpoint);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let platform: Box<dyn Platform> = match config.platform.kind {
        PlatformKind::Terminal => {
            tracing::info!(
                terminal = %config.platform.terminal.address(),
                "Using MetaTrader terminal platform"
            );
            Box::new(TerminalPlatform::new(config.platform.terminal.clone()))
        }
        PlatformKind::Simulated => {
            tracing::warn!("Using simulated platform; no orders reach a real account");
            Box::new(SimulatedPlatform::new(SimulatedPlatformConfig::default()))
        }
    };

    BridgeServer::new(config.server, platform)
        .run(shutdown_signal())
        .await
        .context("Bridge stopped with an error")
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Server stopped by user");
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = match logging.file_path() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
    Ok(())
}
