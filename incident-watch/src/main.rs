use incident_watch::status::status_router;
use std::path::Path;
use std::sync::Arc;
use sync_core::{init_logging, EventKind, SharedToken, SyncConfig, SyncContext, SyncError};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("incident-watch: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SyncError> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => SyncConfig::load(Path::new(&path))?,
        None => SyncConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    init_logging(&config.log).map_err(|e| SyncError::Config(e.to_string()))?;

    let tokens = SharedToken::new(config.api.token.clone());
    if config.api.token.is_none() {
        warn!("INCIDENT_AUTH_TOKEN not set; sync stays idle");
    }

    let ctx = Arc::new(SyncContext::from_config(&config, Arc::new(tokens))?);
    ctx.channel().subscribe(EventKind::IncidentFlagged, |event| {
        info!(?event, "incident flagged");
    });
    ctx.start();

    let listener = tokio::net::TcpListener::bind(config.watch.addr.as_str()).await?;
    info!(
        addr = %config.watch.addr,
        api = %config.api.base_url,
        "incident-watch listening"
    );
    axum::serve(listener, status_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    ctx.stop();
    Ok(())
}
