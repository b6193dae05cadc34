use anyhow::Result;
use servers::ais_logic::{config, downstream, logger, state, upstream};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    // A missing .env file is fine; the environment may already be populated.
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;
    logger::setup_logging(&config.log_dir, &config.log_level)?;
    match &config.config_file {
        Some(path) => log::info!("Loaded config file {}", path.display()),
        None => log::info!("No config file found. Using defaults and environment/CLI variables."),
    }
    log::info!("Starting AIS relay with {:?}", config);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new();

    let upstream_handle = tokio::spawn(upstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate_signal() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let (upstream_result, downstream_result) = tokio::join!(upstream_handle, downstream_handle);
    if let Err(e) = upstream_result {
        log::error!("Upstream task failed: {}", e);
    }
    match downstream_result {
        Ok(Err(e)) => log::error!("Downstream server failed: {:#}", e),
        Err(e) => log::error!("Downstream task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
