//! pgcursor: held-cursor pagination server
//!
//! # Usage
//!
//! ```bash
//! # Serve the user search API
//! DATABASE_URL=postgres://localhost/app pgcursor serve --bind 0.0.0.0:8080
//!
//! # Insert 10 000 users with random names
//! pgcursor seed --count 10000
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use pgcursor::config::Config;
use pgcursor::engine::PgExecutor;
use pgcursor::seed::{DEFAULT_SEED_COUNT, seed};
use pgcursor::server::Server;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgcursor")]
#[command(version)]
#[command(about = "Offset-free pagination over PostgreSQL held cursors", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgcursor serve --bind 0.0.0.0:8080
    curl 'localhost:8080/users?id_match=>100&page_size=50'
    curl 'localhost:8080/users/<cursor_id>?page_size=50'
    pgcursor seed --count 10000")]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection URL (falls back to DB_CONNECTION)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Server bind address
        #[arg(short, long, env = "BIND_ADDRESS")]
        bind: Option<String>,

        /// Cursor lifetime in seconds (capped at 1200)
        #[arg(long)]
        ttl: Option<u64>,

        /// Maximum rows per page (capped at 500)
        #[arg(long)]
        max_page_size: Option<usize>,
    },
    /// Insert users with random names
    Seed {
        /// Number of users to insert
        #[arg(short = 'n', long, default_value_t = DEFAULT_SEED_COUNT)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pgcursor=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Serve {
            bind,
            ttl,
            max_page_size,
        } => serve(&cli, bind.clone(), *ttl, *max_page_size).await,
        Commands::Seed { count } => run_seed(&cli, *count).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(url) = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DB_CONNECTION").ok())
    {
        config.database_url = url;
    }

    Ok(config)
}

async fn serve(
    cli: &Cli,
    bind: Option<String>,
    ttl: Option<u64>,
    max_page_size: Option<usize>,
) -> anyhow::Result<()> {
    let base = load_config(cli)?;
    let config = Config::builder()
        .database(base.database_url)
        .bind(bind.unwrap_or(base.bind_address))
        .ttl(Duration::from_secs(ttl.unwrap_or(base.ttl_secs)))
        .max_page_size(max_page_size.unwrap_or(base.max_page_size))
        .statement_timeout(Duration::from_secs(base.statement_timeout_secs))
        .build();
    config.validate()?;

    let server = Server::connect(config).await?;
    server.serve().await?;
    Ok(())
}

async fn run_seed(cli: &Cli, count: usize) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    println!("{} Connecting to database...", "🔌".cyan());
    let db = PgExecutor::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Connection failed: {}", e))?;

    let inserted = seed(&db, count).await?;
    println!("{} Seeded {} users", "✓".green(), inserted.to_string().cyan());
    Ok(())
}
