use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub mod bot;
pub mod manager;
pub mod refresh;
pub mod signals;
pub mod web;

#[derive(Debug)]
pub enum ServiceResult {
    GracefulShutdown,
    NormalCompletion,
    Error(anyhow::Error),
}

/// Common trait for all long-running services.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// The name of the service for logging
    fn name(&self) -> &'static str;

    /// Run the service's main work loop
    async fn run(&mut self) -> Result<(), anyhow::Error>;

    /// Gracefully shut down the service
    ///
    /// Called once after a shutdown signal, with `run` already stopped.
    async fn shutdown(&mut self) -> Result<(), anyhow::Error>;
}

/// Generic service runner that handles the lifecycle
pub async fn run_service(
    mut service: Box<dyn Service>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ServiceResult {
    let name = service.name();
    info!(service = name, "service started");

    tokio::select! {
        result = service.run() => match result {
            Ok(()) => {
                warn!(service = name, "service completed unexpectedly");
                ServiceResult::NormalCompletion
            }
            Err(e) => {
                error!(service = name, error = ?e, "service failed");
                ServiceResult::Error(e)
            }
        },
        _ = shutdown_rx.recv() => {
            info!(service = name, "shutting down");
            let start = std::time::Instant::now();
            match service.shutdown().await {
                Ok(()) => {
                    info!(
                        service = name,
                        duration = crate::utils::fmt_duration(start.elapsed()),
                        "service shut down"
                    );
                    ServiceResult::GracefulShutdown
                }
                Err(e) => {
                    error!(service = name, error = ?e, "service shutdown failed");
                    ServiceResult::Error(e)
                }
            }
        }
    }
}
