use crate::refresh::agent::RefreshAgent;
use crate::refresh::domain::Domain;
use crate::refresh::message::{
    Completion, Envelope, Origin, Payload, RefreshOutcome, RefreshRequest,
};
use crate::utils::{SLOW_REFRESH, fmt_duration, log_if_slow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, trace, warn};

/// Routes sweep outcomes back to the scheduler that dispatched them.
#[derive(Clone, Default)]
pub struct CompletionRouter {
    sweeps: HashMap<Domain, mpsc::UnboundedSender<Completion>>,
}

impl CompletionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the completion channel of `domain`'s scheduler.
    pub fn register(&mut self, domain: Domain, tx: mpsc::UnboundedSender<Completion>) {
        self.sweeps.insert(domain, tx);
    }

    fn route(&self, completion: Completion) {
        match self.sweeps.get(&completion.domain) {
            Some(tx) => {
                if tx.send(completion).is_err() {
                    trace!("Scheduler gone, dropping completion");
                }
            }
            None => warn!(domain = %completion.domain, "No scheduler registered for completion"),
        }
    }
}

/// A single worker agent.
///
/// Each worker owns its request channel and processes up to `concurrency`
/// requests at once. Outcomes go back to the broker as response envelopes
/// when the request wanted a reply, and to the originating scheduler when it
/// came from a sweep.
pub struct Worker {
    id: usize,
    agent: Arc<RefreshAgent>,
    permits: Arc<Semaphore>,
    responses: mpsc::Sender<Envelope>,
    completions: CompletionRouter,
}

impl Worker {
    pub fn new(
        id: usize,
        agent: Arc<RefreshAgent>,
        concurrency: usize,
        responses: mpsc::Sender<Envelope>,
        completions: CompletionRouter,
    ) -> Self {
        Self {
            id,
            agent,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            responses,
            completions,
        }
    }

    /// Runs the worker's main loop until cancelled or its channel closes.
    ///
    /// Requests still running at shutdown are aborted; their domains keep the
    /// old timestamps and are picked up by a later sweep.
    pub async fn run(self, mut requests: mpsc::Receiver<Envelope>, cancel: CancellationToken) {
        info!(worker_id = self.id, "Worker started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(worker_id = self.id, "Worker received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(worker_id = self.id, error = ?e, "Refresh task panicked");
                    }
                }
                envelope = requests.recv() => {
                    let Some(envelope) = envelope else {
                        debug!(worker_id = self.id, "Request channel closed");
                        break;
                    };
                    let Payload::Refresh(request) = envelope.payload else {
                        warn!(
                            worker_id = self.id,
                            correlation_id = %envelope.correlation_id,
                            "Worker received a non-request envelope"
                        );
                        continue;
                    };

                    // Waiting here stops draining the channel, which pushes
                    // back on the dispatchers.
                    let permit = tokio::select! {
                        _ = cancel.cancelled() => break,
                        permit = self.permits.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let agent = self.agent.clone();
                    let responses = self.responses.clone();
                    let completions = self.completions.clone();
                    let worker_id = self.id;
                    tasks.spawn(async move {
                        let _permit = permit;
                        process(worker_id, &agent, request, &responses, &completions).await;
                    });
                }
            }
        }

        if !tasks.is_empty() {
            info!(
                worker_id = self.id,
                in_flight = tasks.len(),
                "Aborting in-flight refreshes"
            );
        }
        tasks.shutdown().await;
        info!(worker_id = self.id, "Worker exiting gracefully");
    }
}

async fn process(
    worker_id: usize,
    agent: &RefreshAgent,
    request: RefreshRequest,
    responses: &mpsc::Sender<Envelope>,
    completions: &CompletionRouter,
) {
    let span = tracing::info_span!(
        "refresh",
        worker_id,
        player_id = %request.player_id,
        origin = ?request.origin
    );
    let start = Instant::now();
    let outcome = agent.handle(&request).instrument(span.clone()).await;
    let duration = span.in_scope(|| log_if_slow(start, SLOW_REFRESH, "refresh"));
    log_outcome(worker_id, &request, &outcome, duration);

    if request.reply_required
        && responses
            .send(Envelope::response(request.correlation_id, outcome.clone()))
            .await
            .is_err()
    {
        warn!(
            worker_id,
            correlation_id = %request.correlation_id,
            "Response channel closed, reply dropped"
        );
    }

    if let Origin::Sweep(domain) = request.origin {
        completions.route(Completion {
            correlation_id: request.correlation_id,
            player_id: request.player_id,
            domain,
            outcome,
        });
    }
}

fn log_outcome(
    worker_id: usize,
    request: &RefreshRequest,
    outcome: &RefreshOutcome,
    duration: Duration,
) {
    match outcome {
        RefreshOutcome::Success => debug!(
            worker_id,
            player_id = %request.player_id,
            domains = %request.domains,
            duration = fmt_duration(duration),
            "Refresh completed"
        ),
        RefreshOutcome::PartialFailure { failed } => info!(
            worker_id,
            player_id = %request.player_id,
            domains = %request.domains,
            failed = %failed,
            duration = fmt_duration(duration),
            "Refresh partially failed, failed domains stay stale"
        ),
        RefreshOutcome::RecordNotFound => debug!(
            worker_id,
            player_id = %request.player_id,
            "Refresh target no longer exists"
        ),
    }
}
