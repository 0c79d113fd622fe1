//! Request/response correlation between the coordinator and worker agents.
//!
//! Every outbound request gets a fresh [`CorrelationId`]. Requests that want a
//! reply register a pending call with its own timer; whichever of "matching
//! response arrives" and "timer fires" happens first resolves the call, and
//! anything arriving afterwards is discarded.

use crate::data::models::PlayerId;
use crate::refresh::domain::DomainSet;
use crate::refresh::message::{
    CorrelationId, Envelope, MessageKind, Origin, Payload, RefreshOutcome, RefreshRequest,
};
use crate::utils::fmt_duration;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("no worker is accepting requests")]
    TransportClosed,
}

/// Delivers envelopes to the worker side.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError>;
}

/// In-process transport that spreads requests over worker agents round-robin.
///
/// A worker whose channel is closed is skipped; the send only fails once every
/// worker has gone away.
pub struct ChannelTransport {
    workers: Vec<mpsc::Sender<Envelope>>,
    next: AtomicUsize,
}

impl ChannelTransport {
    pub fn new(workers: Vec<mpsc::Sender<Envelope>>) -> Self {
        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, mut envelope: Envelope) -> Result<(), BrokerError> {
        let count = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..count {
            let worker = &self.workers[(start + offset) % count];
            match worker.send(envelope).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => envelope = returned,
            }
        }
        Err(BrokerError::TransportClosed)
    }
}

/// How a reply-required call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    Completed(RefreshOutcome),
    TimedOut,
}

struct PendingCall {
    created_at: Instant,
    sender: oneshot::Sender<CallResult>,
    timer: Option<AbortHandle>,
}

/// Handle to a reply-required request; resolves exactly once.
///
/// Awaiting it yields the worker's outcome or [`CallResult::TimedOut`],
/// whichever the broker observed first.
pub struct PendingReply {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
}

impl IntoFuture for PendingReply {
    type Output = CallResult;
    type IntoFuture = BoxFuture<'static, CallResult>;

    fn into_future(self) -> Self::IntoFuture {
        // The sender only disappears without sending if the broker itself was
        // dropped, in which case no reply can ever arrive.
        self.rx
            .map(|result| result.unwrap_or(CallResult::TimedOut))
            .boxed()
    }
}

/// Result of [`Broker::dispatch`].
pub enum Dispatched {
    /// Handed to the transport; nothing further will be reported here.
    Sent(CorrelationId),
    /// Awaiting a reply or the timeout.
    Pending(PendingReply),
}

pub struct Broker {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<CorrelationId, PendingCall>>,
    next_id: AtomicU64,
}

impl Broker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of reply-required calls still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn request(
        &self,
        player_id: PlayerId,
        domains: DomainSet,
        origin: Origin,
        reply_required: bool,
    ) -> RefreshRequest {
        RefreshRequest {
            player_id,
            domains,
            correlation_id: self.next_correlation_id(),
            dispatched_at: Utc::now(),
            reply_required,
            origin,
        }
    }

    /// Send a refresh request to a worker.
    ///
    /// With `reply_timeout = None` this is [`Broker::send`], otherwise
    /// [`Broker::call`].
    pub async fn dispatch(
        &self,
        player_id: PlayerId,
        domains: DomainSet,
        origin: Origin,
        reply_timeout: Option<Duration>,
    ) -> Result<Dispatched, BrokerError> {
        match reply_timeout {
            None => self
                .send(player_id, domains, origin)
                .await
                .map(Dispatched::Sent),
            Some(timeout) => self
                .call(player_id, domains, origin, timeout)
                .await
                .map(Dispatched::Pending),
        }
    }

    /// Fire-and-forget dispatch: returns once the transport accepted the
    /// request. No pending call is created.
    pub async fn send(
        &self,
        player_id: PlayerId,
        domains: DomainSet,
        origin: Origin,
    ) -> Result<CorrelationId, BrokerError> {
        let request = self.request(player_id, domains, origin, false);
        let correlation_id = request.correlation_id;
        self.transport.send(Envelope::request(request)).await?;
        trace!(%correlation_id, player_id = %player_id, %domains, "Request sent");
        Ok(correlation_id)
    }

    /// Reply-required dispatch that resolves within `timeout`.
    ///
    /// The pending call is registered before sending, so a fast response can
    /// never miss it. If the transport rejects the request the registration
    /// is rolled back.
    pub async fn call(
        &self,
        player_id: PlayerId,
        domains: DomainSet,
        origin: Origin,
        timeout: Duration,
    ) -> Result<PendingReply, BrokerError> {
        let request = self.request(player_id, domains, origin, true);
        let correlation_id = request.correlation_id;

        let rx = self.register(correlation_id, timeout);
        if let Err(e) = self.transport.send(Envelope::request(request)).await {
            if let Some((_, call)) = self.pending.remove(&correlation_id)
                && let Some(timer) = call.timer
            {
                timer.abort();
            }
            return Err(e);
        }

        debug!(
            %correlation_id,
            player_id = %player_id,
            %domains,
            timeout = fmt_duration(timeout),
            "Request sent, awaiting reply"
        );
        Ok(PendingReply { correlation_id, rx })
    }

    fn register(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.insert(
            correlation_id,
            PendingCall {
                created_at: Instant::now(),
                sender: tx,
                timer: None,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused: {correlation_id}");

        let pending = self.pending.clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some((_, call)) = pending.remove(&correlation_id) {
                debug!(
                    %correlation_id,
                    waited = fmt_duration(call.created_at.elapsed()),
                    "Pending call timed out"
                );
                let _ = call.sender.send(CallResult::TimedOut);
            }
        });

        match self.pending.get_mut(&correlation_id) {
            Some(mut call) => call.timer = Some(timer.abort_handle()),
            // Already resolved, the timer has nothing left to do
            None => timer.abort(),
        }
        rx
    }

    /// Route an inbound envelope to its waiting caller.
    ///
    /// Returns `true` if a pending call was resolved. Responses for calls that
    /// already resolved (timeout or an earlier response) and unknown ids are a
    /// benign race and are dropped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        let correlation_id = envelope.correlation_id;
        let outcome = match (envelope.kind, envelope.payload) {
            (MessageKind::Response, Payload::Outcome(outcome)) => outcome,
            (kind, _) => {
                warn!(%correlation_id, ?kind, "Ignoring inbound envelope that is not a response");
                return false;
            }
        };

        let Some((_, call)) = self.pending.remove(&correlation_id) else {
            trace!(%correlation_id, %outcome, "Discarding response with no pending call");
            return false;
        };

        if let Some(timer) = call.timer {
            timer.abort();
        }
        debug!(
            %correlation_id,
            %outcome,
            waited = fmt_duration(call.created_at.elapsed()),
            "Pending call completed"
        );
        // The caller may have stopped waiting; that is not an error.
        let _ = call.sender.send(CallResult::Completed(outcome));
        true
    }

    /// Drain worker responses into [`Broker::deliver`] until cancelled or the
    /// response channel closes.
    pub async fn run_responses(
        self: Arc<Self>,
        mut responses: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = responses.recv() => match envelope {
                    Some(envelope) => {
                        self.deliver(envelope);
                    }
                    None => {
                        warn!("Worker response channel closed");
                        break;
                    }
                },
            }
        }
        info!(pending = self.pending_count(), "Broker response loop stopped");
    }
}
