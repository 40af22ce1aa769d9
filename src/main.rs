//! media-relay server binary.

use clap::Parser;
use media_relay::{Config, Error, MediaRelay, Result, run_with_shutdown};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Relay media from short-lived URLs and package batch downloads
#[derive(Debug, Parser)]
#[command(name = "media-relay", version, about)]
struct Args {
    /// JSON configuration file (every field optional)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address for the HTTP API (overrides the config file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Output root for relayed files and archives (overrides the config file)
    #[arg(short, long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse before tracing so --help works without logs
    let args = Args::parse();

    // RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(dir) = args.download_dir {
        config.download.download_dir = dir;
    }

    info!(
        bind = %config.server.bind_address,
        download_dir = %config.download_dir().display(),
        "media-relay starting"
    );

    let service = Arc::new(MediaRelay::new(config).await?);
    let mut api = service.spawn_api_server();

    tokio::select! {
        // Server ended on its own (e.g. bind failure)
        joined = &mut api => {
            service.shutdown().await?;
            return joined.map_err(|e| Error::ApiServerError(format!("API task failed: {e}")))?;
        }
        stopped = run_with_shutdown(service.clone()) => stopped?,
    }

    api.await
        .map_err(|e| Error::ApiServerError(format!("API task failed: {e}")))??;
    info!("media-relay stopped");
    Ok(())
}
