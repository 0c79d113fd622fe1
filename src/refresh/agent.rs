//! Executes a single refresh request against the data source and the store.

use crate::data::PlayerStore;
use crate::data::models::{DomainPayload, Player, PlayerPatch};
use crate::refresh::domain::{Domain, DomainSet};
use crate::refresh::message::{RefreshOutcome, RefreshRequest};
use crate::riot::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Source of fresh per-domain player data.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, domain: Domain, player: &Player) -> Result<DomainPayload, FetchError>;
}

/// Timestamp to record for a successful refresh.
///
/// Kept at microsecond precision, which is what `timestamptz` stores, and
/// always strictly later than `previous` at that precision, even if the clock
/// has not moved (or moved backwards) since the last refresh.
pub fn next_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match previous.map(|prev| prev.trunc_subsecs(6)) {
        Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

pub struct RefreshAgent {
    store: Arc<dyn PlayerStore>,
    source: Arc<dyn DataSource>,
}

impl RefreshAgent {
    pub fn new(store: Arc<dyn PlayerStore>, source: Arc<dyn DataSource>) -> Self {
        Self { store, source }
    }

    /// Refresh every requested domain of one player.
    ///
    /// Domains are fetched concurrently. Failed domains keep their old fields
    /// and timestamp so the next sweep picks them up again; all successful
    /// domains are written in a single field-scoped patch.
    #[tracing::instrument(
        skip_all,
        fields(player_id = %request.player_id, correlation_id = %request.correlation_id)
    )]
    pub async fn handle(&self, request: &RefreshRequest) -> RefreshOutcome {
        let player = match self.store.get_by_id(request.player_id).await {
            Ok(Some(player)) => player,
            Ok(None) => {
                debug!("Player not found, dropping request");
                return RefreshOutcome::RecordNotFound;
            }
            Err(e) => {
                warn!(error = ?e, "Failed to load player");
                return RefreshOutcome::PartialFailure {
                    failed: request.domains,
                };
            }
        };

        let fetches = request.domains.domains().map(|domain| {
            let player = &player;
            async move { (domain, self.source.fetch(domain, player).await) }
        });
        let results = join_all(fetches).await;

        let mut patch = PlayerPatch::default();
        let mut failed = DomainSet::empty();
        for (domain, result) in results {
            match result {
                Ok(payload) if payload.domain() == domain => {
                    let stamped_at = next_stamp(player.last_update(domain), Utc::now());
                    patch.apply(payload, stamped_at);
                }
                Ok(payload) => {
                    error!(
                        %domain,
                        returned = %payload.domain(),
                        "Data source returned a payload for the wrong domain"
                    );
                    failed.insert_domain(domain);
                }
                Err(FetchError::NotFound) => {
                    debug!(%domain, "Upstream has no data for player");
                    failed.insert_domain(domain);
                }
                Err(e) if e.is_transient() => {
                    debug!(%domain, error = %e, "Transient fetch failure");
                    failed.insert_domain(domain);
                }
                Err(e) => {
                    warn!(%domain, error = ?e, "Fetch failed");
                    failed.insert_domain(domain);
                }
            }
        }

        if !patch.is_empty() {
            if let Err(e) = self.store.patch(player.id, &patch).await {
                error!(error = ?e, "Failed to store refreshed fields");
                for domain in patch.domains() {
                    failed.insert_domain(domain);
                }
            } else {
                trace!(domains = ?patch.domains(), "Stored refreshed fields");
            }
        }

        if failed.is_empty() {
            RefreshOutcome::Success
        } else {
            RefreshOutcome::PartialFailure { failed }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryStore;
    use crate::data::models::{
        AccountPayload, MasteryPayload, PlayerId, RankPayload, RankedEntry,
    };
    use crate::refresh::message::{CorrelationId, Origin};
    use chrono::TimeZone;

    struct StaticSource {
        failing: DomainSet,
    }

    #[async_trait]
    impl DataSource for StaticSource {
        async fn fetch(&self, domain: Domain, _: &Player) -> Result<DomainPayload, FetchError> {
            if self.failing.has(domain) {
                return Err(FetchError::Status {
                    status: 503,
                    url: "https://example.invalid".to_owned(),
                });
            }
            Ok(match domain {
                Domain::Mastery => DomainPayload::Mastery(MasteryPayload {
                    score: 300,
                    points: 2_000_000,
                }),
                Domain::Rank => DomainPayload::Rank(RankPayload {
                    entries: vec![RankedEntry {
                        queue: "RANKED_SOLO_5x5".to_owned(),
                        tier: "GOLD".to_owned(),
                        division: "II".to_owned(),
                        league_points: 45,
                        wins: 20,
                        losses: 18,
                    }],
                }),
                Domain::Account => DomainPayload::Account(AccountPayload {
                    game_name: "Orianna".to_owned(),
                    tag_line: "EUW".to_owned(),
                    summoner_level: 412,
                }),
            })
        }
    }

    fn player(id: i32, stamp: DateTime<Utc>) -> Player {
        Player {
            id: PlayerId(id),
            discord_id: i64::from(id) + 1000,
            puuid: format!("puuid-{id}"),
            platform: "euw1".to_owned(),
            game_name: None,
            tag_line: None,
            summoner_level: None,
            mastery_score: None,
            mastery_points: None,
            ranked_tiers: sqlx::types::Json(Vec::new()),
            last_mastery_update_at: Some(stamp),
            last_rank_update_at: Some(stamp),
            last_account_update_at: Some(stamp),
            last_refresh_requested_at: None,
        }
    }

    fn request(id: i32, domains: DomainSet) -> RefreshRequest {
        RefreshRequest {
            player_id: PlayerId(id),
            domains,
            correlation_id: CorrelationId(1),
            dispatched_at: Utc::now(),
            reply_required: true,
            origin: Origin::OnDemand,
        }
    }

    fn agent(store: Arc<MemoryStore>, failing: DomainSet) -> RefreshAgent {
        RefreshAgent::new(store, Arc::new(StaticSource { failing }))
    }

    #[test]
    fn next_stamp_is_strictly_later() {
        let prev = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(next_stamp(Some(prev), now) > prev);
        assert_eq!(next_stamp(Some(now), prev), prev);
        assert_eq!(next_stamp(None, now), now);
    }

    #[test]
    fn next_stamp_stays_later_at_microsecond_precision() {
        let prev = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Less than a microsecond after the last refresh
        let now = prev + chrono::Duration::nanoseconds(400);
        let stamp = next_stamp(Some(prev), now);
        assert!(stamp > prev);
        assert_eq!(stamp.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(stamp, prev + chrono::Duration::microseconds(1));

        let later = prev + chrono::Duration::nanoseconds(2_500_700);
        assert_eq!(
            next_stamp(Some(prev), later),
            prev + chrono::Duration::microseconds(2_500)
        );
    }

    #[tokio::test]
    async fn missing_player_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let outcome = agent(store.clone(), DomainSet::empty())
            .handle(&request(1, DomainSet::all()))
            .await;
        assert_eq!(outcome, RefreshOutcome::RecordNotFound);
        assert_eq!(store.patch_count(), 0);
    }

    #[tokio::test]
    async fn success_advances_all_requested_timestamps_in_one_write() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert(player(1, old));

        let outcome = agent(store.clone(), DomainSet::empty())
            .handle(&request(1, DomainSet::MASTERY | DomainSet::ACCOUNT))
            .await;
        assert_eq!(outcome, RefreshOutcome::Success);
        assert_eq!(store.patch_count(), 1);

        let updated = store.get(PlayerId(1)).unwrap();
        assert!(updated.last_mastery_update_at.unwrap() > old);
        assert!(updated.last_account_update_at.unwrap() > old);
        assert_eq!(updated.last_rank_update_at, Some(old));
        assert_eq!(updated.mastery_score, Some(300));
        assert_eq!(updated.riot_id().as_deref(), Some("Orianna#EUW"));
    }

    #[tokio::test]
    async fn failed_domain_is_left_untouched() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert(player(1, old));

        let outcome = agent(store.clone(), DomainSet::MASTERY)
            .handle(&request(1, DomainSet::MASTERY | DomainSet::RANK))
            .await;
        assert_eq!(
            outcome,
            RefreshOutcome::PartialFailure {
                failed: DomainSet::MASTERY
            }
        );

        let updated = store.get(PlayerId(1)).unwrap();
        assert_eq!(updated.last_mastery_update_at, Some(old));
        assert!(updated.mastery_score.is_none());
        assert!(updated.last_rank_update_at.unwrap() > old);
        assert_eq!(updated.ranked_tiers.0.len(), 1);
    }

    #[tokio::test]
    async fn all_domains_failing_writes_nothing() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert(player(1, old));

        let outcome = agent(store.clone(), DomainSet::all())
            .handle(&request(1, DomainSet::all()))
            .await;
        assert_eq!(
            outcome,
            RefreshOutcome::PartialFailure {
                failed: DomainSet::all()
            }
        );
        assert_eq!(store.patch_count(), 0);
    }
}
