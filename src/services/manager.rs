use crate::services::{Service, ServiceResult, run_service};
use crate::utils::fmt_duration;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Manages multiple services and their lifecycle
pub struct ServiceManager {
    registered_services: HashMap<String, Box<dyn Service>>,
    service_handles: HashMap<String, JoinHandle<()>>,
    completion_rx: mpsc::UnboundedReceiver<(String, ServiceResult)>,
    completion_tx: mpsc::UnboundedSender<(String, ServiceResult)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            registered_services: HashMap::new(),
            service_handles: HashMap::new(),
            completion_rx,
            completion_tx,
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned)
    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered_services.insert(name.to_string(), service);
    }

    pub fn has_services(&self) -> bool {
        !self.registered_services.is_empty() || !self.service_handles.is_empty()
    }

    /// Spawn all registered services
    pub fn spawn_all(&mut self) {
        let service_count = self.registered_services.len();
        let service_names: Vec<_> = self.registered_services.keys().cloned().collect();

        for (name, service) in self.registered_services.drain() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let completion_tx = self.completion_tx.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let result = run_service(service, shutdown_rx).await;
                let _ = completion_tx.send((task_name, result));
            });
            self.service_handles.insert(name.clone(), handle);
            trace!(service = name, id = ?self.service_handles[&name].id(), "service spawned");
        }

        info!(
            service_count,
            services = ?service_names,
            "spawned {} services",
            service_count
        );
    }

    /// Wait for the first service to finish on its own.
    ///
    /// Returns `None` if no services are running.
    pub async fn run(&mut self) -> Option<(String, ServiceResult)> {
        if self.service_handles.is_empty() {
            return None;
        }
        let (name, result) = self.completion_rx.recv().await?;
        self.service_handles.remove(&name);
        Some((name, result))
    }

    /// Broadcast shutdown and wait for every remaining service within `timeout`.
    ///
    /// On timeout, the names of the services that did not stop are returned
    /// and their tasks are aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let service_count = self.service_handles.len();
        info!(
            service_count,
            timeout = fmt_duration(timeout),
            "shutting down services"
        );

        let start = Instant::now();
        let _ = self.shutdown_tx.send(());

        let mut failed = Vec::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        while !self.service_handles.is_empty() {
            tokio::select! {
                completed = self.completion_rx.recv() => {
                    let Some((name, result)) = completed else { break };
                    self.service_handles.remove(&name);
                    match result {
                        ServiceResult::GracefulShutdown | ServiceResult::NormalCompletion => {
                            debug!(service = name, "service stopped");
                        }
                        ServiceResult::Error(e) => {
                            warn!(service = name, error = ?e, "service stopped with error");
                            failed.push(name);
                        }
                    }
                }
                _ = &mut deadline => {
                    for (name, handle) in self.service_handles.drain() {
                        warn!(service = name, "service did not stop in time, aborting");
                        handle.abort();
                        failed.push(name);
                    }
                }
            }
        }

        if failed.is_empty() {
            let elapsed = start.elapsed();
            info!(duration = fmt_duration(elapsed), "all services shut down");
            Ok(elapsed)
        } else {
            failed.sort();
            Err(failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Idle {
        name: &'static str,
        shutdown_delay: Duration,
    }

    #[async_trait]
    impl Service for Idle {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&mut self) -> Result<(), anyhow::Error> {
            std::future::pending().await
        }

        async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
            tokio::time::sleep(self.shutdown_delay).await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&mut self) -> Result<(), anyhow::Error> {
            anyhow::bail!("boom")
        }

        async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_service_is_reported_first() {
        let mut manager = ServiceManager::new();
        manager.register_service(
            "idle",
            Box::new(Idle {
                name: "idle",
                shutdown_delay: Duration::ZERO,
            }),
        );
        manager.register_service("failing", Box::new(Failing));
        manager.spawn_all();

        let (name, result) = manager.run().await.unwrap();
        assert_eq!(name, "failing");
        assert!(matches!(result, ServiceResult::Error(_)));

        assert!(manager.shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_shutdown_times_out() {
        let mut manager = ServiceManager::new();
        manager.register_service(
            "slow",
            Box::new(Idle {
                name: "slow",
                shutdown_delay: Duration::from_secs(30),
            }),
        );
        manager.spawn_all();
        tokio::task::yield_now().await;

        let result = manager.shutdown(Duration::from_secs(5)).await;
        assert_eq!(result, Err(vec!["slow".to_owned()]));
    }

    #[tokio::test]
    async fn run_without_services_returns_none() {
        let mut manager = ServiceManager::new();
        assert!(!manager.has_services());
        assert!(manager.run().await.is_none());
    }
}
