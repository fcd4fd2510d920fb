//! dispatchd - remote execution scheduler entry point

use clap::{Parser, Subcommand};
use dispatchd::config::SchedulerConfig;
use dispatchd::handlers::HandlerRegistry;
use dispatchd::observability::{init_default_logging, init_logging, LogFormat};
use dispatchd::scheduler::Scheduler;
use dispatchd::store::MemoryStore;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, Level};

/// Assigns tasks to connected worker agents and tracks them to completion
#[derive(Parser)]
#[command(name = "dispatchd")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DISPATCHD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and its HTTP/WebSocket listener
    Run,
    /// Validate the configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, log_format(), false),
        _ => init_logging(Level::TRACE, log_format(), true),
    }

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_scheduler(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn log_format() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()))
}

fn load_configuration(
    config_path: Option<&PathBuf>,
) -> Result<SchedulerConfig, Box<dyn std::error::Error>> {
    let (config, source) = SchedulerConfig::discover(config_path.map(PathBuf::as_path))?;
    match source {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using built-in defaults"),
    }
    Ok(config)
}

async fn run_scheduler(config: SchedulerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting dispatchd v{}", env!("CARGO_PKG_VERSION"));

    let ip: IpAddr = config.server.bind_address.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);

    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(
        config,
        store,
        HandlerRegistry::with_builtins(),
    )?);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (bound, server) = dispatchd::server::serve(scheduler.clone(), addr, async move {
        let _ = stop_rx.await;
    })?;
    let server = tokio::spawn(server);

    scheduler.start().await;
    info!("Listening on {}", bound);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }

    scheduler.shutdown().await;
    let _ = stop_tx.send(());
    if let Err(e) = server.await {
        error!("HTTP server task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn handle_config_command(
    config: &SchedulerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", config.to_toml()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
