mod chunk;
mod config;
mod db;
mod document_store;
mod embedding;
mod error;
mod ingest;
mod llm;
mod migrate;
mod models;
mod qa;
mod registry;
mod search_cache;
mod search_engine;
mod server;
mod store;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ragforge", about = "ragforge — multi-representation retrieval-augmented generation service", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default if no subcommand is given)
    Serve,

    /// Create or update the SQLite schema without starting the server
    Migrate,

    /// Print effective configuration and vector store health, then exit
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let command = Cli::parse().command.unwrap_or(Commands::Serve);

    let result = match command {
        Commands::Serve => server::run_server(cfg).await,
        Commands::Migrate => {
            migrate::run_migrations(&cfg).await?;
            println!("database schema up to date at {}", cfg.db.path.display());
            Ok(())
        }
        Commands::Status => {
            let state = server::AppState::from_config(cfg).await?;
            let ok = state.store.heartbeat().await;
            println!("vector store reachable: {ok}");
            println!("demo_mode: {}", state.config.demo_mode);
            if !ok {
                std::process::exit(3);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
