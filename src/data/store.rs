//! Storage seam used by the refresh coordinator.

use crate::data::models::{Player, PlayerId, PlayerPatch};
use crate::refresh::domain::Domain;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// The three operations the coordinator needs from the player store.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Up to `limit` players whose `domain` timestamp is strictly older than
    /// `cutoff` (never-refreshed first), oldest first, ties by id ascending,
    /// skipping any id in `exclude`.
    async fn select_stale(
        &self,
        domain: Domain,
        cutoff: DateTime<Utc>,
        limit: usize,
        exclude: &HashSet<PlayerId>,
    ) -> Result<Vec<PlayerId>>;

    async fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>>;

    /// Write the patched domains' fields and timestamps in a single update.
    async fn patch(&self, id: PlayerId, patch: &PlayerPatch) -> Result<()>;
}
