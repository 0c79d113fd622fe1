//! In-memory [`PlayerStore`], used by tests and local dry runs.

use crate::data::PlayerStore;
use crate::data::models::{Player, PlayerId, PlayerPatch};
use crate::refresh::domain::Domain;
use crate::refresh::selector::select_stale;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    players: DashMap<PlayerId, Player>,
    patches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, player: Player) {
        self.players.insert(player.id, player);
    }

    pub fn get(&self, id: PlayerId) -> Option<Player> {
        self.players.get(&id).map(|p| p.value().clone())
    }

    /// Number of successful `patch` calls so far.
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn select_stale(
        &self,
        domain: Domain,
        cutoff: DateTime<Utc>,
        limit: usize,
        exclude: &HashSet<PlayerId>,
    ) -> Result<Vec<PlayerId>> {
        let candidates: Vec<_> = self
            .players
            .iter()
            .map(|entry| (*entry.key(), entry.value().last_update(domain)))
            .collect();
        Ok(select_stale(candidates, cutoff, limit, exclude))
    }

    async fn get_by_id(&self, id: PlayerId) -> Result<Option<Player>> {
        Ok(self.get(id))
    }

    async fn patch(&self, id: PlayerId, patch: &PlayerPatch) -> Result<()> {
        let Some(mut player) = self.players.get_mut(&id) else {
            bail!("player {id} does not exist");
        };
        patch.merge_into(player.value_mut());
        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
