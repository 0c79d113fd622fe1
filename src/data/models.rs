//! Player record and per-domain payload types.

use crate::refresh::domain::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a tracked player.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct PlayerId(pub i32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked player row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Player {
    pub id: PlayerId,
    pub discord_id: i64,
    pub puuid: String,
    /// Riot platform routing value, e.g. `euw1`.
    pub platform: String,
    pub game_name: Option<String>,
    pub tag_line: Option<String>,
    pub summoner_level: Option<i64>,
    pub mastery_score: Option<i32>,
    pub mastery_points: Option<i64>,
    pub ranked_tiers: sqlx::types::Json<Vec<RankedEntry>>,
    pub last_mastery_update_at: Option<DateTime<Utc>>,
    pub last_rank_update_at: Option<DateTime<Utc>>,
    pub last_account_update_at: Option<DateTime<Utc>>,
    pub last_refresh_requested_at: Option<DateTime<Utc>>,
}

impl Player {
    /// Last successful refresh time of `domain`, `None` if never refreshed.
    pub fn last_update(&self, domain: Domain) -> Option<DateTime<Utc>> {
        match domain {
            Domain::Mastery => self.last_mastery_update_at,
            Domain::Rank => self.last_rank_update_at,
            Domain::Account => self.last_account_update_at,
        }
    }

    pub(crate) fn set_last_update(&mut self, domain: Domain, at: DateTime<Utc>) {
        match domain {
            Domain::Mastery => self.last_mastery_update_at = Some(at),
            Domain::Rank => self.last_rank_update_at = Some(at),
            Domain::Account => self.last_account_update_at = Some(at),
        }
    }

    /// `GameName#TAG` when the account domain has been refreshed at least once.
    pub fn riot_id(&self) -> Option<String> {
        match (&self.game_name, &self.tag_line) {
            (Some(name), Some(tag)) => Some(format!("{name}#{tag}")),
            _ => None,
        }
    }
}

/// Aggregated champion mastery standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryPayload {
    /// Sum of champion mastery levels.
    pub score: i32,
    /// Sum of champion mastery points.
    pub points: i64,
}

/// Standing in a single ranked queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub queue: String,
    pub tier: String,
    pub division: String,
    pub league_points: i32,
    pub wins: i32,
    pub losses: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankPayload {
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPayload {
    pub game_name: String,
    pub tag_line: String,
    pub summoner_level: i64,
}

/// Result of fetching one domain from the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum DomainPayload {
    Mastery(MasteryPayload),
    Rank(RankPayload),
    Account(AccountPayload),
}

impl DomainPayload {
    pub fn domain(&self) -> Domain {
        match self {
            DomainPayload::Mastery(_) => Domain::Mastery,
            DomainPayload::Rank(_) => Domain::Rank,
            DomainPayload::Account(_) => Domain::Account,
        }
    }
}

/// Field-scoped update of a player.
///
/// Only the domains present are written; every other column is left alone so
/// concurrent refreshes of different domains never overwrite each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerPatch {
    pub mastery: Option<(MasteryPayload, DateTime<Utc>)>,
    pub rank: Option<(RankPayload, DateTime<Utc>)>,
    pub account: Option<(AccountPayload, DateTime<Utc>)>,
}

impl PlayerPatch {
    /// Record `payload` with its refresh timestamp.
    pub fn apply(&mut self, payload: DomainPayload, stamped_at: DateTime<Utc>) {
        match payload {
            DomainPayload::Mastery(p) => self.mastery = Some((p, stamped_at)),
            DomainPayload::Rank(p) => self.rank = Some((p, stamped_at)),
            DomainPayload::Account(p) => self.account = Some((p, stamped_at)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mastery.is_none() && self.rank.is_none() && self.account.is_none()
    }

    /// Domains this patch writes.
    pub fn domains(&self) -> Vec<Domain> {
        let mut domains = Vec::with_capacity(3);
        if self.mastery.is_some() {
            domains.push(Domain::Mastery);
        }
        if self.rank.is_some() {
            domains.push(Domain::Rank);
        }
        if self.account.is_some() {
            domains.push(Domain::Account);
        }
        domains
    }

    /// Apply this patch to an in-memory player.
    pub fn merge_into(&self, player: &mut Player) {
        if let Some((mastery, at)) = &self.mastery {
            player.mastery_score = Some(mastery.score);
            player.mastery_points = Some(mastery.points);
            player.set_last_update(Domain::Mastery, *at);
        }
        if let Some((rank, at)) = &self.rank {
            player.ranked_tiers = sqlx::types::Json(rank.entries.clone());
            player.set_last_update(Domain::Rank, *at);
        }
        if let Some((account, at)) = &self.account {
            player.game_name = Some(account.game_name.clone());
            player.tag_line = Some(account.tag_line.clone());
            player.summoner_level = Some(account.summoner_level);
            player.set_last_update(Domain::Account, *at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn blank_player() -> Player {
        Player {
            id: PlayerId(1),
            discord_id: 42,
            puuid: "puuid-1".to_owned(),
            platform: "euw1".to_owned(),
            game_name: None,
            tag_line: None,
            summoner_level: None,
            mastery_score: None,
            mastery_points: None,
            ranked_tiers: sqlx::types::Json(Vec::new()),
            last_mastery_update_at: None,
            last_rank_update_at: None,
            last_account_update_at: None,
            last_refresh_requested_at: None,
        }
    }

    #[test]
    fn merge_only_touches_patched_domains() {
        let mut player = blank_player();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        player.last_rank_update_at = Some(earlier);

        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut patch = PlayerPatch::default();
        patch.apply(
            DomainPayload::Mastery(MasteryPayload {
                score: 120,
                points: 1_500_000,
            }),
            at,
        );
        patch.merge_into(&mut player);

        assert_eq!(player.mastery_score, Some(120));
        assert_eq!(player.last_mastery_update_at, Some(at));
        assert_eq!(player.last_rank_update_at, Some(earlier));
        assert!(player.last_account_update_at.is_none());
        assert_eq!(patch.domains(), vec![Domain::Mastery]);
    }

    #[test]
    fn riot_id_requires_both_parts() {
        let mut player = blank_player();
        assert_eq!(player.riot_id(), None);
        player.game_name = Some("Faker".to_owned());
        player.tag_line = Some("KR1".to_owned());
        assert_eq!(player.riot_id().as_deref(), Some("Faker#KR1"));
    }
}
