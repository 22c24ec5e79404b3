//! LudoBet match server binary

use clap::Parser;
use ludobet::config::ConfigLoader;
use ludobet::dice::ThreadRngDice;
use ludobet::directory::SessionDirectory;
use ludobet::ledger::MemoryLedger;
use ludobet::registry::ConnectionRegistry;
use ludobet::server::{AppState, GameServer, LedgerAuthenticator};
use ludobet::settlement::SettlementEngine;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ludobet", about = "Wagered real-time Ludo match server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Write a sample configuration file to the given path and exit
    #[arg(long)]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ludobet=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(path) = args.generate_config {
        ConfigLoader::new().save(&Default::default(), &path)?;
        info!("Sample configuration written to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let registry = Arc::new(ConnectionRegistry::new());
    let ledger = Arc::new(MemoryLedger::new(registry.clone()));
    let settlement = Arc::new(SettlementEngine::new(
        ledger.clone(),
        config.settlement.clone(),
    ));
    let directory = Arc::new(SessionDirectory::new(
        registry.clone(),
        ledger.clone(),
        settlement,
        Arc::new(ThreadRngDice),
        config.game.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        auth: Arc::new(LedgerAuthenticator::new(ledger.clone())),
        ledger,
        directory,
    });

    GameServer::new(config, state).run().await
}
