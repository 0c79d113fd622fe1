//! Shared fixtures for coordinator integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use orianna::data::PlayerStore;
use orianna::data::memory::MemoryStore;
use orianna::data::models::{
    AccountPayload, DomainPayload, MasteryPayload, Player, PlayerId, RankPayload, RankedEntry,
};
use orianna::refresh::agent::DataSource;
use orianna::refresh::domain::{Domain, DomainSet};
use orianna::refresh::scheduler::DomainSchedule;
use orianna::refresh::{Coordinator, CoordinatorSettings};
use orianna::riot::FetchError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Midnight of the given day in January 2024.
pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
}

/// A player last refreshed at `stamp` in every domain.
pub fn make_player(id: i32, stamp: Option<DateTime<Utc>>) -> Player {
    Player {
        id: PlayerId(id),
        discord_id: 1000 + i64::from(id),
        puuid: format!("puuid-{id}"),
        platform: "euw1".to_owned(),
        game_name: None,
        tag_line: None,
        summoner_level: None,
        mastery_score: None,
        mastery_points: None,
        ranked_tiers: sqlx::types::Json(Vec::new()),
        last_mastery_update_at: stamp,
        last_rank_update_at: stamp,
        last_account_update_at: stamp,
        last_refresh_requested_at: None,
    }
}

/// Data source with per-domain latency, switchable failures and call counts.
#[derive(Default)]
pub struct ScriptedSource {
    delays: HashMap<Domain, Duration>,
    player_delays: HashMap<PlayerId, Duration>,
    failing: Mutex<DomainSet>,
    calls: DashMap<(PlayerId, Domain), usize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, domain: Domain, delay: Duration) -> Self {
        self.delays.insert(domain, delay);
        self
    }

    /// Overrides the domain delay for one player.
    pub fn with_player_delay(mut self, id: PlayerId, delay: Duration) -> Self {
        self.player_delays.insert(id, delay);
        self
    }

    pub fn failing(self, domains: DomainSet) -> Self {
        self.set_failing(domains);
        self
    }

    pub fn set_failing(&self, domains: DomainSet) {
        *self.failing.lock().unwrap() = domains;
    }

    pub fn calls(&self, id: PlayerId, domain: Domain) -> usize {
        self.calls.get(&(id, domain)).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self, domain: Domain, player: &Player) -> Result<DomainPayload, FetchError> {
        *self.calls.entry((player.id, domain)).or_insert(0) += 1;

        let delay = self
            .player_delays
            .get(&player.id)
            .or_else(|| self.delays.get(&domain))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().has(domain) {
            return Err(FetchError::Status {
                status: 503,
                url: format!("https://{}.api.riotgames.com", player.platform),
            });
        }

        Ok(match domain {
            Domain::Mastery => DomainPayload::Mastery(MasteryPayload {
                score: 120,
                points: 900_000,
            }),
            Domain::Rank => DomainPayload::Rank(RankPayload {
                entries: vec![RankedEntry {
                    queue: "RANKED_SOLO_5x5".to_owned(),
                    tier: "PLATINUM".to_owned(),
                    division: "IV".to_owned(),
                    league_points: 12,
                    wins: 40,
                    losses: 38,
                }],
            }),
            Domain::Account => DomainPayload::Account(AccountPayload {
                game_name: format!("Player{}", player.id),
                tag_line: "EUW".to_owned(),
                summoner_level: 100,
            }),
        })
    }
}

pub fn schedule(domain: Domain, interval: Duration, amount: usize) -> DomainSchedule {
    DomainSchedule {
        domain,
        interval,
        amount,
        stuck_multiplier: 3,
    }
}

pub fn settings(schedules: Vec<DomainSchedule>) -> CoordinatorSettings {
    CoordinatorSettings {
        worker_count: 2,
        worker_concurrency: 8,
        schedules,
    }
}

/// Start a coordinator over `store` and `source`.
pub fn start(
    store: &Arc<MemoryStore>,
    source: &Arc<ScriptedSource>,
    schedules: Vec<DomainSchedule>,
) -> Coordinator {
    let store: Arc<dyn PlayerStore> = store.clone();
    let source: Arc<dyn DataSource> = source.clone();
    Coordinator::start(&settings(schedules), store, source)
}
