//! Postgres-backed player store.

use crate::data::PlayerStore;
use crate::data::models::{Player, PlayerId, PlayerPatch};
use crate::refresh::domain::Domain;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;

const PLAYER_SELECT: &str = "SELECT id, discord_id, puuid, platform, game_name, tag_line, \
     summoner_level, mastery_score, mastery_points, ranked_tiers, \
     last_mastery_update_at, last_rank_update_at, last_account_update_at, \
     last_refresh_requested_at \
     FROM players";

#[derive(Debug, Clone)]
pub struct PgPlayerStore {
    pool: PgPool,
}

impl PgPlayerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Builds the field-scoped UPDATE for `patch`, or `None` when it is empty.
fn build_patch_query(id: PlayerId, patch: &PlayerPatch) -> Option<QueryBuilder<'_, Postgres>> {
    if patch.is_empty() {
        return None;
    }

    let mut qb = QueryBuilder::new("UPDATE players SET ");
    let mut set = qb.separated(", ");

    if let Some((mastery, at)) = &patch.mastery {
        set.push("mastery_score = ").push_bind_unseparated(mastery.score);
        set.push("mastery_points = ")
            .push_bind_unseparated(mastery.points);
        set.push(format!("{} = ", Domain::Mastery.timestamp_column()))
            .push_bind_unseparated(*at);
    }
    if let Some((rank, at)) = &patch.rank {
        set.push("ranked_tiers = ")
            .push_bind_unseparated(sqlx::types::Json(&rank.entries));
        set.push(format!("{} = ", Domain::Rank.timestamp_column()))
            .push_bind_unseparated(*at);
    }
    if let Some((account, at)) = &patch.account {
        set.push("game_name = ")
            .push_bind_unseparated(account.game_name.as_str());
        set.push("tag_line = ")
            .push_bind_unseparated(account.tag_line.as_str());
        set.push("summoner_level = ")
            .push_bind_unseparated(account.summoner_level);
        set.push(format!("{} = ", Domain::Account.timestamp_column()))
            .push_bind_unseparated(*at);
    }

    qb.push(" WHERE id = ").push_bind(id);
    Some(qb)
}

#[async_trait]
impl PlayerStore for PgPlayerStore {
    async fn select_stale(
        &self,
        domain: Domain,
        cutoff: DateTime<Utc>,
        limit: usize,
        exclude: &HashSet<PlayerId>,
    ) -> Result<Vec<PlayerId>> {
        let column = domain.timestamp_column();
        let exclude: Vec<i32> = exclude.iter().map(|id| id.0).collect();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let ids: Vec<PlayerId> = sqlx::query_scalar(&format!(
            "SELECT id FROM players \
             WHERE ({column} IS NULL OR {column} < $1) \
               AND NOT (id = ANY($2)) \
             ORDER BY {column} ASC NULLS FIRST, id ASC \
             LIMIT $3"
        ))
        .bind(cutoff)
        .bind(&exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to select stale {domain} players"))?;
        Ok(ids)
    }

    async fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>> {
        let player = sqlx::query_as::<_, Player>(&format!("{PLAYER_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(player)
    }

    async fn patch(&self, id: PlayerId, patch: &PlayerPatch) -> Result<()> {
        let Some(mut qb) = build_patch_query(id, patch) else {
            return Ok(());
        };
        qb.build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to patch player {id}"))?;
        Ok(())
    }
}

/// Look up the player registered to a Discord user.
pub async fn find_by_discord_id(pool: &PgPool, discord_id: i64) -> Result<Option<Player>> {
    let player = sqlx::query_as::<_, Player>(&format!("{PLAYER_SELECT} WHERE discord_id = $1"))
        .bind(discord_id)
        .fetch_optional(pool)
        .await?;
    Ok(player)
}

/// Stamp the caller-visible "last requested" marker after an on-demand refresh.
pub async fn mark_refresh_requested(pool: &PgPool, id: PlayerId, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE players SET last_refresh_requested_at = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Per-domain count of players currently older than the given cutoffs.
pub async fn count_stale(pool: &PgPool, domain: Domain, cutoff: DateTime<Utc>) -> Result<i64> {
    let column = domain.timestamp_column();
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM players WHERE {column} IS NULL OR {column} < $1"
    ))
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
