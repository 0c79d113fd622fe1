use crate::cli::ServiceName;
use crate::refresh::Coordinator;
use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use tracing::info;

/// Runs the refresh coordinator (schedulers, worker agents and broker) as a
/// managed service.
pub struct RefreshService {
    coordinator: Option<Coordinator>,
    service_statuses: ServiceStatusRegistry,
}

impl RefreshService {
    pub fn new(coordinator: Coordinator, service_statuses: ServiceStatusRegistry) -> Self {
        Self {
            coordinator: Some(coordinator),
            service_statuses,
        }
    }
}

#[async_trait::async_trait]
impl Service for RefreshService {
    fn name(&self) -> &'static str {
        ServiceName::Refresh.as_str()
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let name = self.name();
        let Some(coordinator) = self.coordinator.as_mut() else {
            anyhow::bail!("refresh coordinator already shut down");
        };
        self.service_statuses.set(name, ServiceStatus::Active);

        coordinator.wait().await;
        self.service_statuses.set(name, ServiceStatus::Error);
        anyhow::bail!("refresh coordinator task exited")
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.shutdown().await;
        }
        self.service_statuses
            .set(ServiceName::Refresh.as_str(), ServiceStatus::Disabled);
        info!("refresh service shutdown complete");
        Ok(())
    }
}
