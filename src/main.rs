use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use medscan::config::Config;
use medscan::server::Server;

#[derive(Parser)]
#[command(name = "medscan", version, about = "AI-assisted medical image reports with ELI5 summaries")]
struct Cli {
    /// Path to the config file (default: ~/.medscan/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind address from the config
    #[arg(long)]
    bind: Option<String>,

    /// Override the port from the config
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Pick up OPENAI_API_KEY etc. from a local .env if present
    dotenvy::dotenv().ok();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let server = Server::new(&config)?;
    server.run().await
}
