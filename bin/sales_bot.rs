use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use env_logger::Env;
use log::info;
use salecast::{Orchestrator, Settings};

#[derive(Parser, Debug)]
#[command(name = "sales_bot", about = "NFT sale watcher and publication bot")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,
    /// Force log-only mode even when publish credentials are configured
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let settings = Settings::new(&args.config)?;
    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log.level.clone()))
        .init();

    info!(
        "starting sales bot ({} collections, poll every {}s, min post interval {}s)",
        settings.collections.len(),
        settings.ingestion.poll_interval_seconds,
        settings.publisher.min_interval_seconds
    );

    let orchestrator = Orchestrator::build(settings, args.dry_run)?;
    orchestrator.spawn_loops();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, exiting");
    Ok(())
}
