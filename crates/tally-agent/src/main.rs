//! tally agent
//!
//! - Loads `tally.yaml` (or the path given as the first argument)
//! - Registers every declared metric; any registration error aborts startup
//! - Exports a snapshot on the configured interval until Ctrl-C, then once more
//!
//! The binary serves no requests of its own, so the HTTP tracker it registers
//! stays idle here. A host that embeds the agent builds its own `AppState`,
//! records through `AppState::tracker()` and runs `export::run_export_loop`
//! next to its server.

use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use tally_agent::{app_state, config, export};
use tally_core::error::Result;

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, phase = e.phase().as_str(), "tally-agent failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "tally.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let every = cfg.export.interval();

    let state = app_state::AppState::new(cfg)?;
    tracing::info!(
        config = %path,
        metrics = state.metrics().registered().len(),
        interval_ms = every.as_millis() as u64,
        "tally-agent starting"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let exporter = tokio::spawn(export::run_export_loop(
        state.metrics(),
        state.exporter(),
        every,
        stop_rx,
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    let _ = stop_tx.send(true);

    match exporter.await {
        Ok(n) => tracing::info!(exports = n, "tally-agent stopped"),
        Err(e) => tracing::warn!(error = %e, "export task ended abnormally"),
    }
    Ok(())
}
