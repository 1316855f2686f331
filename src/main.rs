use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use pg_cache::db::{Driver, PgDriver, SchemaBootstrapper};
use pg_cache::{Configuration, Result};

#[derive(Parser, Debug)]
#[command(name = "pg-cache")]
#[command(about = "Sharded, time-evicting document cache over PostgreSQL")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "pg-cache.toml")]
    config: PathBuf,

    /// Validate the configuration and exit without touching the database
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        log::error!("Startup failed: {}", e);
        eprintln!("pg-cache: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Arc::new(Configuration::from_file(&args.config)?);
    log::debug!("Loaded configuration: {:?}", config);

    if args.check {
        println!("Configuration OK: {} bucket(s)", config.buckets.len());
        return Ok(());
    }

    let driver: Arc<dyn Driver> = Arc::new(PgDriver::connect(&config.database).await?);
    let scheduler = SchemaBootstrapper::new(config.clone(), driver).start().await?;

    // Shard tables exist from here on; requests may be routed.
    log::info!("Cache schema ready for {} bucket(s)", config.buckets.len());

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    let stats = scheduler.stats();
    log::info!(
        "Rotation passes: {} ({} failed), partitions created: {}, dropped: {}",
        stats.passes,
        stats.failed_passes,
        stats.partitions_created,
        stats.partitions_dropped
    );
    scheduler.stop().await;

    Ok(())
}
