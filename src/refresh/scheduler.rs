//! Periodic per-domain sweeps that keep player data fresh.
//!
//! One [`DomainScheduler`] runs per domain, each with its own interval and
//! batch amount. A sweep selects the stalest players that are not already in
//! flight, marks them in flight, and dispatches one fire-and-forget request
//! per player. Worker completions clear the in-flight marker whether the
//! refresh succeeded or not; a failed domain keeps its old timestamp and is
//! simply selected again by a later sweep.

use crate::data::models::PlayerId;
use crate::refresh::broker::Broker;
use crate::refresh::domain::{Domain, DomainSet};
use crate::refresh::message::{Completion, CorrelationId, Origin};
use crate::refresh::selector::StalenessSelector;
use crate::utils::fmt_duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Sweep cadence and batch size of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSchedule {
    pub domain: Domain,
    pub interval: Duration,
    pub amount: usize,
    /// In-flight entries older than `interval * stuck_multiplier` are evicted.
    pub stuck_multiplier: u32,
}

impl DomainSchedule {
    pub fn stuck_after(&self) -> Duration {
        self.interval.saturating_mul(self.stuck_multiplier.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPhase {
    Idle = 0,
    Selecting = 1,
    Dispatching = 2,
}

impl SweepPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SweepPhase::Selecting,
            2 => SweepPhase::Dispatching,
            _ => SweepPhase::Idle,
        }
    }
}

/// Counters a scheduler publishes for the status endpoint.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    phase: AtomicU8,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
    superseded: AtomicU64,
    last_sweep_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub domain: Domain,
    #[serde(skip)]
    pub interval: Duration,
    pub interval_ms: u64,
    pub amount: usize,
    pub phase: SweepPhase,
    pub in_flight: usize,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub evicted: u64,
    /// Late completions from dispatches that were evicted and replaced.
    pub superseded: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    fn set_phase(&self, phase: SweepPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn snapshot(&self, schedule: &DomainSchedule) -> SchedulerSnapshot {
        SchedulerSnapshot {
            domain: schedule.domain,
            interval: schedule.interval,
            interval_ms: u64::try_from(schedule.interval.as_millis()).unwrap_or(u64::MAX),
            amount: schedule.amount,
            phase: SweepPhase::from_u8(self.phase.load(Ordering::Relaxed)),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            last_sweep_at: self.last_sweep_at.lock().map(|g| *g).unwrap_or(None),
        }
    }
}

/// What [`InFlightSet::release`] did with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The entry belonged to the completed dispatch and was removed.
    Released,
    /// The player is in flight under a newer dispatch; the entry stays.
    Superseded,
    NotInFlight,
}

#[derive(Debug, Clone, Copy)]
struct InFlightEntry {
    correlation_id: CorrelationId,
    since: Instant,
}

/// Players dispatched for one domain and not yet reported back, each tagged
/// with the dispatch it is waiting on.
#[derive(Debug, Default)]
pub struct InFlightSet {
    entries: HashMap<PlayerId, InFlightEntry>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the player was already in flight.
    pub fn insert(&mut self, id: PlayerId, correlation_id: CorrelationId, at: Instant) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            InFlightEntry {
                correlation_id,
                since: at,
            },
        );
        true
    }

    /// Remove `id` only if it is still waiting on `correlation_id`.
    pub fn release(&mut self, id: PlayerId, correlation_id: CorrelationId) -> Release {
        match self.entries.get(&id) {
            None => Release::NotInFlight,
            Some(entry) if entry.correlation_id != correlation_id => Release::Superseded,
            Some(_) => {
                self.entries.remove(&id);
                Release::Released
            }
        }
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> HashSet<PlayerId> {
        self.entries.keys().copied().collect()
    }

    /// Remove and return every entry that has been in flight longer than
    /// `max_age`, with how long it was held.
    pub fn evict_older_than(&mut self, now: Instant, max_age: Duration) -> Vec<(PlayerId, Duration)> {
        let mut evicted = Vec::new();
        self.entries.retain(|id, entry| {
            let held = now.saturating_duration_since(entry.since);
            if held > max_age {
                evicted.push((*id, held));
                false
            } else {
                true
            }
        });
        evicted.sort_unstable();
        evicted
    }
}

pub struct DomainScheduler {
    schedule: DomainSchedule,
    selector: StalenessSelector,
    broker: Arc<Broker>,
    in_flight: InFlightSet,
    completions: mpsc::UnboundedReceiver<Completion>,
    stats: Arc<SchedulerStats>,
}

impl DomainScheduler {
    pub fn new(
        schedule: DomainSchedule,
        selector: StalenessSelector,
        broker: Arc<Broker>,
        completions: mpsc::UnboundedReceiver<Completion>,
    ) -> Self {
        Self {
            schedule,
            selector,
            broker,
            in_flight: InFlightSet::new(),
            completions,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn domain(&self) -> Domain {
        self.schedule.domain
    }

    pub fn schedule(&self) -> DomainSchedule {
        self.schedule
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Runs the sweep loop until cancelled.
    ///
    /// The first sweep happens immediately. Sweeps never wait for the
    /// outcomes of earlier ones: overlap is fine because every player is
    /// guarded individually by the in-flight set.
    pub async fn run(mut self, cancel: CancellationToken) {
        let domain = self.schedule.domain;
        info!(
            %domain,
            interval = fmt_duration(self.schedule.interval),
            amount = self.schedule.amount,
            "Domain scheduler started"
        );

        let mut ticker = time::interval(self.schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(%domain, in_flight = self.in_flight.len(), "Domain scheduler received shutdown signal");
                    break;
                }
                Some(completion) = self.completions.recv() => {
                    self.on_completion(completion);
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One select-then-dispatch cycle. Returns how many requests were sent.
    pub async fn sweep(&mut self) -> usize {
        let domain = self.schedule.domain;
        self.evict_stuck();

        self.stats.set_phase(SweepPhase::Selecting);
        let exclude = self.in_flight.ids();
        let selected = match self.selector.select(self.schedule.amount, &exclude).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(%domain, error = ?e, "Failed to select stale players");
                self.stats.set_phase(SweepPhase::Idle);
                return 0;
            }
        };

        if let Ok(mut last) = self.stats.last_sweep_at.lock() {
            *last = Some(Utc::now());
        }

        if selected.is_empty() {
            trace!(%domain, in_flight = self.in_flight.len(), "No stale players");
            self.stats.set_phase(SweepPhase::Idle);
            return 0;
        }

        self.stats.set_phase(SweepPhase::Dispatching);
        let mut dispatched = 0;
        for player_id in selected {
            if self.in_flight.contains(player_id) {
                // The store ignored the exclusion list; never double-dispatch
                warn!(%domain, player_id = %player_id, "Selected player already in flight, skipping");
                continue;
            }

            // Completions are only handled between sweeps, so marking the
            // player once the transport has accepted it cannot miss one.
            match self
                .broker
                .send(player_id, DomainSet::from(domain), Origin::Sweep(domain))
                .await
            {
                Ok(correlation_id) => {
                    self.in_flight
                        .insert(player_id, correlation_id, Instant::now());
                    trace!(%domain, player_id = %player_id, %correlation_id, "Dispatched");
                    dispatched += 1;
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(%domain, player_id = %player_id, error = %e, "Failed to dispatch refresh");
                }
            }
        }

        self.stats
            .dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        self.stats
            .in_flight
            .store(self.in_flight.len(), Ordering::Relaxed);
        self.stats.set_phase(SweepPhase::Idle);

        if dispatched > 0 {
            debug!(
                %domain,
                dispatched,
                in_flight = self.in_flight.len(),
                "Sweep dispatched"
            );
        }
        dispatched
    }

    /// Clear the in-flight marker for a finished refresh.
    pub fn on_completion(&mut self, completion: Completion) {
        let domain = self.schedule.domain;
        if completion.domain != domain {
            warn!(
                %domain,
                completion_domain = %completion.domain,
                "Completion routed to the wrong scheduler"
            );
            return;
        }

        match self
            .in_flight
            .release(completion.player_id, completion.correlation_id)
        {
            Release::Released => {}
            Release::Superseded => {
                warn!(
                    %domain,
                    player_id = %completion.player_id,
                    correlation_id = %completion.correlation_id,
                    outcome = %completion.outcome,
                    "Ignoring completion from a superseded dispatch"
                );
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Release::NotInFlight => {
                debug!(
                    %domain,
                    player_id = %completion.player_id,
                    outcome = %completion.outcome,
                    "Completion for a player no longer in flight"
                );
                return;
            }
        }

        if completion.outcome.is_success() {
            self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .in_flight
            .store(self.in_flight.len(), Ordering::Relaxed);
    }

    /// Force out players whose outcome apparently got lost so they become
    /// selectable again.
    fn evict_stuck(&mut self) {
        let domain = self.schedule.domain;
        let evicted = self
            .in_flight
            .evict_older_than(Instant::now(), self.schedule.stuck_after());
        for (player_id, held) in &evicted {
            warn!(
                %domain,
                player_id = %player_id,
                held = fmt_duration(*held),
                "Evicting stuck in-flight player (outcome likely lost)"
            );
        }
        if !evicted.is_empty() {
            self.stats
                .evicted
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            self.stats
                .in_flight
                .store(self.in_flight.len(), Ordering::Relaxed);
        }
    }
}
