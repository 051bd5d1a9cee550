//! Wager Agent
//!
//! Main entry point: resolves configuration, streams the bets file to the
//! aggregation server and reports the winners.

use clap::Parser;
use color_eyre::eyre::WrapErr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wager_agent::{
    cancel_on_signal, Client, ConnectionPolicy, CsvBetSource, Settings, TcpConnector,
};

#[derive(Parser, Debug)]
#[command(name = "wager-agent")]
#[command(about = "Streams bet batches to a wager aggregation server", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (TOML); ignored if absent unless given explicitly
    #[arg(short, long, env = "CLI_CONFIG")]
    config: Option<PathBuf>,

    /// Peer id stamped on every frame
    #[arg(long)]
    id: Option<u8>,

    /// Aggregation server address (host:port)
    #[arg(short, long)]
    server_address: Option<String>,

    /// Pause between batches (e.g., "0s", "500ms", "5s")
    #[arg(long)]
    loop_period: Option<String>,

    /// Overall time budget for the run (e.g., "30s", "5m")
    #[arg(long)]
    loop_lapse: Option<String>,

    /// Maximum bets per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Connection lifetime: per-exchange or persistent
    #[arg(long)]
    connection_policy: Option<ConnectionPolicy>,

    /// Bets file (CSV: first name, last name, id, birth date, number)
    #[arg(long)]
    bets: Option<PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> Settings {
        Settings {
            id: self.id,
            server_address: self.server_address.clone(),
            loop_period: self.loop_period.clone(),
            loop_lapse: self.loop_lapse.clone(),
            batch_size: self.batch_size,
            connection_policy: self.connection_policy,
            bets_file: self.bets.clone(),
            ..Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let args = Args::parse();

    let (path, required) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from("config.toml"), false),
    };
    let settings = Settings::load(&path, required)
        .map_err(|e| color_eyre::eyre::eyre!("{:#}", e))?
        .merge(args.overrides());

    init_tracing(args.verbose, args.log_json, settings.log_level.as_deref())?;

    let bets_file = settings
        .bets_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("bets.csv"));
    let config = settings
        .into_client_config()
        .map_err(|e| color_eyre::eyre::eyre!("{:#}", e))?;

    let token = cancel_on_signal(CancellationToken::new());
    let connector = TcpConnector::new(config.server_address.clone(), config.connect_timeout);
    let peer_id = config.peer_id;
    let client = Client::new(config, connector, token).wrap_err("Invalid configuration")?;
    info!("Configuration: {:?}", client.config());

    let mut source = match CsvBetSource::open(&bets_file).await {
        Ok(source) => source,
        Err(e) => {
            error!("action: open_bets | result: fail | client_id: {} | error: {}", peer_id, e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        "action: open_bets | result: success | client_id: {} | path: {}",
        peer_id,
        source.path().display()
    );

    match client.run(&mut source).await {
        Ok(report) => {
            info!(
                "action: exit | result: success | client_id: {} | termination: {:?}",
                peer_id, report.termination
            );
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("action: exit | result: fail | client_id: {} | error: {}", peer_id, e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool, level: Option<&str>) -> color_eyre::Result<()> {
    let default = if verbose {
        "debug".to_string()
    } else {
        level.unwrap_or("info").to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}
