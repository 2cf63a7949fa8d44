use log::{error, info};
use meridian_gateway::{PaperExchange, RetryingGateway};
use meridian_ports::PositionStore;
use meridian_runner::{Engine, EngineConfig, JsonFileStore, MemoryStore, StaticCandidateSource};
use std::sync::Arc;

fn print_help() {
    eprintln!(
        r#"Meridian - autonomous trading control loop (paper venue)

USAGE:
    meridian [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG            Log level filter (default: info)

EXAMPLES:
    # Run with defaults (no candidates, in-memory store)
    meridian

    # Run with config file
    meridian --config meridian.json
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(args[i].clone());
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            EngineConfig::from_file(&path)?
        }
        None => {
            info!("Using default configuration");
            EngineConfig::default()
        }
    };

    let venue = PaperExchange::new(config.paper.balance).with_fees(config.fees.clone());
    for listing in &config.paper.symbols {
        venue.list_symbol(&listing.symbol, listing.mark).await;
    }
    info!(
        "Paper venue: balance {}, {} symbols",
        config.paper.balance,
        config.paper.symbols.len()
    );
    let gateway = Arc::new(RetryingGateway::new(venue, config.retry.policy()));

    let source = match &config.candidates_file {
        Some(path) => StaticCandidateSource::from_file(path)?,
        None => StaticCandidateSource::empty(),
    };
    let store: Arc<dyn PositionStore> = match &config.store_dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let engine = Engine::builder(config, gateway, Arc::new(source))
        .with_store(store)
        .build()
        .await?;
    engine.start().await?;
    info!("Running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    engine.stop().await?;
    let status = engine.get_status().await;
    match serde_json::to_string_pretty(&status) {
        Ok(json) => info!("Final status:\n{}", json),
        Err(_) => info!("Final status: {:?}", status),
    }
    Ok(())
}
