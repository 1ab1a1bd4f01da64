use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod stream_logic;
use stream_logic::{config, logger, wiring};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env file: {}", e);
        }
    }

    let config = config::load_config();
    let settings = config.validate()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    let credentials = wiring::resolve_credentials(&settings.credentials).await?;
    log::info!(
        "Starting session supervisor for machine [{}] in region [{}] on service [{}]",
        credentials.machine_id,
        credentials.region,
        credentials.service_name
    );

    let supervisor = wiring::build_supervisor(&settings, credentials, tokio::runtime::Handle::current())?;
    let shutdown = CancellationToken::new();
    let supervisor_handle = tokio::spawn(supervisor.clone().run(shutdown.clone()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    shutdown.cancel();

    // Wait for the supervisor to uninitialize the live session
    if let Err(e) = supervisor_handle.await {
        log::error!("Session supervisor task failed: {}", e);
    }

    log::info!(
        "Shutdown complete after {} cycles and {} session teardowns.",
        supervisor.stats().cycles(),
        supervisor.stats().teardowns()
    );
    Ok(())
}
