//! Cluster update coordination: periodic per-domain sweeps, the on-demand
//! refresh path, and the broker that correlates both with worker agents.

pub mod agent;
pub mod broker;
pub mod domain;
pub mod message;
pub mod on_demand;
pub mod scheduler;
pub mod selector;
pub mod worker;

use crate::data::PlayerStore;
use crate::refresh::agent::{DataSource, RefreshAgent};
use crate::refresh::broker::{Broker, ChannelTransport};
use crate::refresh::on_demand::OnDemandRefresher;
use crate::refresh::scheduler::{DomainSchedule, DomainScheduler, SchedulerSnapshot, SchedulerStats};
use crate::refresh::selector::StalenessSelector;
use crate::refresh::worker::{CompletionRouter, Worker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Worker responses waiting to be routed back to callers.
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub worker_count: usize,
    pub worker_concurrency: usize,
    pub schedules: Vec<DomainSchedule>,
}

/// Cloneable view of a running coordinator for callers and status reporting.
#[derive(Clone)]
pub struct CoordinatorHandle {
    broker: Arc<Broker>,
    on_demand: OnDemandRefresher,
    stats: Arc<Vec<(DomainSchedule, Arc<SchedulerStats>)>>,
}

impl CoordinatorHandle {
    pub fn on_demand(&self) -> &OnDemandRefresher {
        &self.on_demand
    }

    pub fn pending_calls(&self) -> usize {
        self.broker.pending_count()
    }

    pub fn scheduler_snapshots(&self) -> Vec<SchedulerSnapshot> {
        self.stats
            .iter()
            .map(|(schedule, stats)| stats.snapshot(schedule))
            .collect()
    }
}

/// Owns every task of the refresh pipeline.
pub struct Coordinator {
    handle: CoordinatorHandle,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Wire up the broker, worker agents and one scheduler per configured
    /// domain, and spawn them all.
    pub fn start(
        settings: &CoordinatorSettings,
        store: Arc<dyn PlayerStore>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);

        let mut router = CompletionRouter::new();
        let mut completion_rxs = Vec::with_capacity(settings.schedules.len());
        for schedule in &settings.schedules {
            let (tx, rx) = mpsc::unbounded_channel();
            router.register(schedule.domain, tx);
            completion_rxs.push(rx);
        }

        let agent = Arc::new(RefreshAgent::new(store.clone(), source));
        let worker_count = settings.worker_count.max(1);
        let concurrency = settings.worker_concurrency.max(1);
        let mut worker_txs = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = mpsc::channel(concurrency * 2);
            worker_txs.push(tx);
            let worker = Worker::new(
                id,
                agent.clone(),
                concurrency,
                response_tx.clone(),
                router.clone(),
            );
            tasks.spawn(worker.run(rx, cancel.child_token()));
        }
        drop(response_tx);

        let broker = Arc::new(Broker::new(Arc::new(ChannelTransport::new(worker_txs))));
        tasks.spawn(broker.clone().run_responses(response_rx, cancel.child_token()));

        let mut stats = Vec::with_capacity(settings.schedules.len());
        for (schedule, completions) in settings.schedules.iter().zip(completion_rxs) {
            let selector = StalenessSelector::new(store.clone(), schedule.domain, schedule.interval);
            let scheduler = DomainScheduler::new(*schedule, selector, broker.clone(), completions);
            stats.push((*schedule, scheduler.stats()));
            tasks.spawn(scheduler.run(cancel.child_token()));
        }

        info!(
            workers = worker_count,
            concurrency,
            domains = settings.schedules.len(),
            "Refresh coordinator started"
        );

        Self {
            handle: CoordinatorHandle {
                on_demand: OnDemandRefresher::new(broker.clone()),
                broker,
                stats: Arc::new(stats),
            },
            tasks,
            cancel,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Resolves when any coordinator task stops on its own, which only
    /// happens if something went wrong.
    pub async fn wait(&mut self) {
        if let Some(Err(e)) = self.tasks.join_next().await {
            error!(error = ?e, "Refresh coordinator task failed");
        }
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                error!(error = ?e, "Refresh coordinator task panicked during shutdown");
            }
        }
        info!("Refresh coordinator stopped");
    }
}
