//! Run command - drive the engine headless until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tidewatch::config::ConfigFile;
use tidewatch::engine::{EngineHandle, TrackingEngine};
use tidewatch::logging::{init_logging, mask_credential};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{
    load_config, resolve_api_url, resolve_logging, resolve_render, resolve_transport,
};
use crate::error::CliError;
use crate::surface::LogSurface;

/// How often the status line is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Arguments for the run command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Config file (default: platform config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// REST API base URL
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Primary push feed base URL
    #[arg(long, value_name = "URL")]
    pub primary_url: Option<String>,

    /// Credential for the fallback stream
    #[arg(long, value_name = "KEY")]
    pub credential: Option<String>,

    /// Never open the fallback stream
    #[arg(long)]
    pub no_fallback: bool,

    /// Maximum points per published snapshot
    #[arg(long, value_name = "N")]
    pub budget: Option<usize>,

    /// Log filter, e.g. info or tidewatch=debug
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

/// Run the engine.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let config = resolve(args)?;
    let _logging = init_logging(&config.logging)?;

    info!(
        version = tidewatch::VERSION,
        api = %config.api.base_url,
        primary = %config.transport.primary_endpoint(),
        credential = %config.transport.credential.as_deref().map(mask_credential).unwrap_or_else(|| "none".into()),
        budget = config.render.budget,
        "Tidewatch starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    runtime.block_on(serve(config, shutdown))
}

/// Merge command-line flags over the config file.
fn resolve(args: RunArgs) -> Result<ConfigFile, CliError> {
    let mut config = load_config(args.config.as_deref())?;
    config.api.base_url = resolve_api_url(args.api_url, &config);
    config.transport = resolve_transport(args.primary_url, args.credential, args.no_fallback, &config);
    config.render = resolve_render(args.budget, &config)?;
    config.logging = resolve_logging(args.log_level, &config);
    Ok(config)
}

async fn serve(config: ConfigFile, shutdown: CancellationToken) -> Result<(), CliError> {
    let surface = Arc::new(LogSurface::new(config.viewport));
    let mut engine = TrackingEngine::builder(config.engine_config(), surface.clone())
        .websocket_channels()?
        .http_endpoints(&config.api)?
        .start()?;

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = status.tick() => log_status(&engine, &surface).await,
        }
    }

    info!("Shutdown requested");
    match engine.stop().await {
        Some(store) => info!(
            objects = store.len(),
            rejected = store.rejected_count(),
            "Session ended"
        ),
        None => warn!("Engine already stopped"),
    }
    Ok(())
}

async fn log_status(engine: &EngineHandle, surface: &LogSurface) {
    let Ok(stats) = engine.stats().await else {
        warn!("Engine not responding");
        return;
    };
    let transport = engine.transport_status().snapshot();
    info!(
        objects = stats.objects,
        rejected = stats.rejected,
        transport = %transport.state(),
        received = transport.accepted,
        snapshots = surface.replaced(),
        "Status"
    );
}
