//! Volume Backup/Restore Daemon
//!
//! Restores the latest archive of every configured path at startup, then
//! serves an HTTP endpoint where any POST triggers a fresh backup pass.
//! SIGINT or SIGTERM stops the server and takes one final backup.

// volumetool/src/main.rs
mod config;
mod storage;
mod volume;
mod backup;
mod restore;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::VolumeConfig;
use crate::storage::Bucket;
use crate::volume::Volume;

#[derive(Parser, Debug)]
#[command(name = "volumetool")]
#[command(about = "Backs up local paths to S3 and restores them on startup")]
struct Args {
    /// Bucket that holds the configuration document and all archives
    #[arg(long)]
    bucket: String,

    /// Port the backup trigger endpoint listens on
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Key of the configuration document inside the bucket
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let bucket = Bucket::connect(&args.bucket).await;
    let config = VolumeConfig::fetch(&bucket, &args.config)
        .await
        .context("Failed to load the volume configuration")?;
    let volume = Arc::new(Volume::new(config, bucket)?);

    volume
        .restore()
        .await
        .context("Startup restore pass failed")?;

    let router = server::create_router(Arc::clone(&volume));
    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("Failed to bind to port {}", args.port))?;
    info!("Server started port:{}", args.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("Trigger endpoint failed")?;

    // The listener is closed; take one last backup before exiting.
    if let Err(error) = volume.backup().await {
        error!("Final backup pass failed: {:#}", error);
    }

    info!("Finished");
    Ok(())
}
