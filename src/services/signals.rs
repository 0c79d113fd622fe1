use crate::services::ServiceResult;
use crate::services::manager::ServiceManager;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Wait for SIGINT/SIGTERM or for a service to exit, then shut everything down.
///
/// Exits non-zero when a service failed or did not stop within `shutdown_timeout`.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let mut exit_code = ExitCode::SUCCESS;

    tokio::select! {
        completed = service_manager.run() => match completed {
            Some((name, ServiceResult::Error(e))) => {
                error!(service = name, error = ?e, "service failed, shutting down");
                exit_code = ExitCode::FAILURE;
            }
            Some((name, result)) => {
                warn!(service = name, ?result, "service exited, shutting down");
            }
            None => {
                error!("no services running");
                return ExitCode::FAILURE;
            }
        },
        signal = shutdown_signal() => {
            info!(signal, "received shutdown signal");
        }
    }

    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(duration = fmt_duration(elapsed), "graceful shutdown complete");
        }
        Err(pending) => {
            error!(
                services = ?pending,
                timeout = fmt_duration(shutdown_timeout),
                "graceful shutdown incomplete"
            );
            exit_code = ExitCode::FAILURE;
        }
    }

    exit_code
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
