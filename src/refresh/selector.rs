//! Staleness selection: which players a sweep should refresh next.

use crate::data::PlayerStore;
use crate::data::models::PlayerId;
use crate::refresh::domain::Domain;
use crate::utils::{SLOW_QUERY, log_if_slow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug_span;

/// Reference selection over an in-memory candidate list.
///
/// A candidate is eligible when its timestamp is `None` or strictly older
/// than `cutoff`. Never-refreshed players sort first, then by timestamp,
/// then by id. The Postgres store expresses the same ordering in SQL.
pub fn select_stale<I>(
    candidates: I,
    cutoff: DateTime<Utc>,
    limit: usize,
    exclude: &HashSet<PlayerId>,
) -> Vec<PlayerId>
where
    I: IntoIterator<Item = (PlayerId, Option<DateTime<Utc>>)>,
{
    let mut eligible: Vec<(Option<DateTime<Utc>>, PlayerId)> = candidates
        .into_iter()
        .filter(|(id, _)| !exclude.contains(id))
        .filter(|(_, ts)| ts.is_none_or(|ts| ts < cutoff))
        .map(|(id, ts)| (ts, id))
        .collect();

    // `None < Some(_)` for Option, so never-refreshed rows lead.
    eligible.sort_unstable();
    eligible.into_iter().take(limit).map(|(_, id)| id).collect()
}

/// Timestamps strictly older than this are due for a refresh.
pub fn stale_cutoff(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
    now.checked_sub_signed(interval)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Picks the stalest players of one domain, honouring the domain interval.
#[derive(Clone)]
pub struct StalenessSelector {
    store: Arc<dyn PlayerStore>,
    domain: Domain,
    interval: Duration,
}

impl StalenessSelector {
    pub fn new(store: Arc<dyn PlayerStore>, domain: Domain, interval: Duration) -> Self {
        Self {
            store,
            domain,
            interval,
        }
    }

    /// Players refreshed within the last interval are never returned, even
    /// when they are otherwise the oldest.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        stale_cutoff(now, self.interval)
    }

    pub async fn select(&self, limit: usize, exclude: &HashSet<PlayerId>) -> Result<Vec<PlayerId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let cutoff = self.cutoff(Utc::now());
        let start = Instant::now();
        let ids = self
            .store
            .select_stale(self.domain, cutoff, limit, exclude)
            .await?;
        debug_span!("select_stale", domain = %self.domain)
            .in_scope(|| log_if_slow(start, SLOW_QUERY, "select_stale"));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn takes_the_oldest_up_to_limit() {
        let candidates = vec![
            (PlayerId(5), Some(at(5))),
            (PlayerId(3), Some(at(3))),
            (PlayerId(1), Some(at(1))),
            (PlayerId(4), Some(at(4))),
            (PlayerId(2), Some(at(2))),
        ];
        let selected = select_stale(candidates, at(30), 3, &HashSet::new());
        assert_eq!(selected, vec![PlayerId(1), PlayerId(2), PlayerId(3)]);
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let candidates = vec![
            (PlayerId(9), Some(at(1))),
            (PlayerId(2), Some(at(1))),
            (PlayerId(7), Some(at(1))),
        ];
        let selected = select_stale(candidates, at(30), 2, &HashSet::new());
        assert_eq!(selected, vec![PlayerId(2), PlayerId(7)]);
    }

    #[test]
    fn never_refreshed_players_come_first() {
        let candidates = vec![(PlayerId(1), Some(at(1))), (PlayerId(2), None)];
        let selected = select_stale(candidates, at(30), 10, &HashSet::new());
        assert_eq!(selected, vec![PlayerId(2), PlayerId(1)]);
    }

    #[test]
    fn cutoff_is_strict() {
        let candidates = vec![(PlayerId(1), Some(at(10))), (PlayerId(2), Some(at(9)))];
        let selected = select_stale(candidates, at(10), 10, &HashSet::new());
        assert_eq!(selected, vec![PlayerId(2)]);
    }

    #[test]
    fn excluded_ids_are_skipped() {
        let candidates = vec![
            (PlayerId(1), Some(at(1))),
            (PlayerId(2), Some(at(2))),
            (PlayerId(3), Some(at(3))),
        ];
        let exclude: HashSet<_> = [PlayerId(1)].into_iter().collect();
        let selected = select_stale(candidates, at(30), 2, &exclude);
        assert_eq!(selected, vec![PlayerId(2), PlayerId(3)]);
    }

    #[test]
    fn cutoff_keeps_sub_second_intervals() {
        let now = at(10);
        assert_eq!(
            stale_cutoff(now, Duration::from_millis(1_500)),
            now - chrono::Duration::milliseconds(1_500)
        );
        assert_eq!(
            stale_cutoff(now, Duration::from_millis(250)),
            now - chrono::Duration::milliseconds(250)
        );
        assert_eq!(stale_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn fewer_than_limit_is_not_an_error() {
        let candidates = vec![(PlayerId(1), Some(at(1)))];
        let selected = select_stale(candidates, at(30), 25, &HashSet::new());
        assert_eq!(selected, vec![PlayerId(1)]);
    }
}
