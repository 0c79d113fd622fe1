//! End-to-end behaviour of the refresh coordinator: sweeps, worker agents and
//! the on-demand path wired together over the in-memory store.

mod helpers;

use helpers::{ScriptedSource, day, make_player, schedule, start};
use orianna::data::memory::MemoryStore;
use orianna::data::models::PlayerId;
use orianna::refresh::broker::CallResult;
use orianna::refresh::domain::{Domain, DomainSet};
use orianna::refresh::message::RefreshOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

const MINUTE: Duration = Duration::from_secs(60);

fn store_with(players: impl IntoIterator<Item = orianna::data::models::Player>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for player in players {
        store.insert(player);
    }
    store
}

#[tokio::test(start_paused = true)]
async fn sweep_refreshes_only_the_oldest_batch() {
    let store = store_with((1..=5).map(|i| make_player(i, Some(day(i as u32)))));
    let source = Arc::new(ScriptedSource::new());
    let coordinator = start(&store, &source, vec![schedule(Domain::Mastery, MINUTE, 3)]);

    time::sleep(Duration::from_secs(1)).await;

    for id in 1..=3 {
        let player = store.get(PlayerId(id)).unwrap();
        assert!(
            player.last_mastery_update_at.unwrap() > day(id as u32),
            "player {id} should have been refreshed"
        );
        assert_eq!(player.mastery_score, Some(120));
        // Other domains are untouched by a mastery sweep
        assert_eq!(player.last_rank_update_at, Some(day(id as u32)));
    }
    for id in 4..=5 {
        let player = store.get(PlayerId(id)).unwrap();
        assert_eq!(player.last_mastery_update_at, Some(day(id as u32)));
        assert_eq!(source.calls(PlayerId(id), Domain::Mastery), 0);
    }

    // The next sweep picks up the remaining two
    time::sleep(MINUTE).await;
    for id in 4..=5 {
        assert_eq!(source.calls(PlayerId(id), Domain::Mastery), 1);
    }

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn never_refreshed_players_go_first() {
    let store = store_with([
        make_player(1, Some(day(1))),
        make_player(2, None),
        make_player(3, Some(day(2))),
    ]);
    let source = Arc::new(ScriptedSource::new());
    let coordinator = start(&store, &source, vec![schedule(Domain::Rank, MINUTE, 2)]);

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(PlayerId(2), Domain::Rank), 1);
    assert_eq!(source.calls(PlayerId(1), Domain::Rank), 1);
    assert_eq!(source.calls(PlayerId(3), Domain::Rank), 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn in_flight_players_are_not_dispatched_twice() {
    let store = store_with([make_player(1, Some(day(1))), make_player(2, Some(day(2)))]);
    // Slower than two sweep intervals but faster than the eviction window
    let source = Arc::new(
        ScriptedSource::new().with_delay(Domain::Mastery, Duration::from_secs(150)),
    );
    let coordinator = start(&store, &source, vec![schedule(Domain::Mastery, MINUTE, 5)]);

    time::sleep(Duration::from_secs(130)).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Mastery), 1);
    assert_eq!(source.calls(PlayerId(2), Domain::Mastery), 1);
    let snapshot = &coordinator.handle().scheduler_snapshots()[0];
    assert_eq!(snapshot.in_flight, 2);

    time::sleep(Duration::from_secs(30)).await;
    let player = store.get(PlayerId(1)).unwrap();
    assert!(player.last_mastery_update_at.unwrap() > day(1));

    // Refreshed players are fresh now and are not selected again
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Mastery), 1);
    let snapshot = &coordinator.handle().scheduler_snapshots()[0];
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.succeeded, 2);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_domain_is_retried_on_a_later_sweep() {
    let store = store_with([make_player(1, Some(day(1)))]);
    let source = Arc::new(ScriptedSource::new().failing(DomainSet::ACCOUNT));
    let coordinator = start(&store, &source, vec![schedule(Domain::Account, MINUTE, 1)]);

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Account), 1);
    assert_eq!(
        store.get(PlayerId(1)).unwrap().last_account_update_at,
        Some(day(1))
    );

    source.set_failing(DomainSet::empty());
    time::sleep(MINUTE).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Account), 2);
    let player = store.get(PlayerId(1)).unwrap();
    assert!(player.last_account_update_at.unwrap() > day(1));
    assert_eq!(player.riot_id().as_deref(), Some("Player1#EUW"));

    let snapshot = &coordinator.handle().scheduler_snapshots()[0];
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.succeeded, 1);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stuck_player_is_evicted_and_selected_again() {
    let store = store_with([make_player(1, Some(day(1)))]);
    // The first fetch never comes back within the test
    let source = Arc::new(
        ScriptedSource::new().with_player_delay(PlayerId(1), Duration::from_secs(24 * 3600)),
    );
    let coordinator = start(&store, &source, vec![schedule(Domain::Mastery, MINUTE, 1)]);

    // Still held while less than three intervals have passed
    time::sleep(Duration::from_secs(170)).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Mastery), 1);

    time::sleep(Duration::from_secs(80)).await;
    assert_eq!(source.calls(PlayerId(1), Domain::Mastery), 2);
    let snapshot = &coordinator.handle().scheduler_snapshots()[0];
    assert_eq!(snapshot.evicted, 1);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_demand_completes_before_timeout() {
    let store = store_with([make_player(7, Some(day(1)))]);
    let source = Arc::new(
        ScriptedSource::new()
            .with_delay(Domain::Mastery, Duration::from_secs(5))
            .with_delay(Domain::Rank, Duration::from_secs(3))
            .with_delay(Domain::Account, Duration::from_secs(4)),
    );
    let coordinator = start(&store, &source, Vec::new());
    let handle = coordinator.handle();

    let result = handle
        .on_demand()
        .request_refresh(PlayerId(7), DomainSet::all(), Duration::from_secs(20))
        .await
        .unwrap();

    assert_eq!(result, CallResult::Completed(RefreshOutcome::Success));
    let player = store.get(PlayerId(7)).unwrap();
    for domain in Domain::ALL {
        assert!(player.last_update(domain).unwrap() > day(1));
    }
    assert_eq!(store.patch_count(), 1);
    assert_eq!(handle.pending_calls(), 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_demand_times_out_and_late_work_still_lands() {
    let store = store_with([make_player(7, Some(day(1)))]);
    let source = Arc::new(
        ScriptedSource::new().with_player_delay(PlayerId(7), Duration::from_secs(25)),
    );
    let coordinator = start(&store, &source, Vec::new());
    let handle = coordinator.handle();

    let started = time::Instant::now();
    let result = handle
        .on_demand()
        .request_refresh(PlayerId(7), DomainSet::MASTERY, Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(result, CallResult::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(25));
    assert_eq!(handle.pending_calls(), 0);

    // The worker was not cancelled; its result is stored, the reply dropped
    time::sleep(Duration::from_secs(10)).await;
    let player = store.get(PlayerId(7)).unwrap();
    assert!(player.last_mastery_update_at.unwrap() > day(1));
    assert_eq!(handle.pending_calls(), 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_demand_partial_failure_keeps_failed_timestamp() {
    let store = store_with([make_player(3, Some(day(1)))]);
    let source = Arc::new(ScriptedSource::new().failing(DomainSet::MASTERY));
    let coordinator = start(&store, &source, Vec::new());

    let result = coordinator
        .handle()
        .on_demand()
        .request_refresh(
            PlayerId(3),
            DomainSet::MASTERY | DomainSet::RANK,
            Duration::from_secs(20),
        )
        .await
        .unwrap();

    assert_eq!(
        result,
        CallResult::Completed(RefreshOutcome::PartialFailure {
            failed: DomainSet::MASTERY
        })
    );
    let player = store.get(PlayerId(3)).unwrap();
    assert_eq!(player.last_mastery_update_at, Some(day(1)));
    assert!(player.last_rank_update_at.unwrap() > day(1));
    assert_eq!(player.last_account_update_at, Some(day(1)));

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_demand_for_missing_player_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedSource::new());
    let coordinator = start(&store, &source, Vec::new());

    let result = coordinator
        .handle()
        .on_demand()
        .request_refresh(PlayerId(404), DomainSet::all(), Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(
        result,
        CallResult::Completed(RefreshOutcome::RecordNotFound)
    );
    assert_eq!(source.calls(PlayerId(404), Domain::Mastery), 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sweeps_and_on_demand_share_the_workers() {
    let store = store_with((1..=4).map(|i| make_player(i, Some(day(i as u32)))));
    let source = Arc::new(ScriptedSource::new().with_delay(Domain::Rank, Duration::from_secs(2)));
    let coordinator = start(
        &store,
        &source,
        vec![
            schedule(Domain::Mastery, MINUTE, 4),
            schedule(Domain::Rank, 2 * MINUTE, 4),
        ],
    );

    let result = coordinator
        .handle()
        .on_demand()
        .request_refresh(PlayerId(2), DomainSet::ACCOUNT, Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(result, CallResult::Completed(RefreshOutcome::Success));

    time::sleep(Duration::from_secs(5)).await;
    for id in 1..=4 {
        let player = store.get(PlayerId(id)).unwrap();
        assert!(player.last_mastery_update_at.unwrap() > day(id as u32));
        assert!(player.last_rank_update_at.unwrap() > day(id as u32));
    }

    let snapshots = coordinator.handle().scheduler_snapshots();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|s| s.dispatched == 4 && s.in_flight == 0));

    coordinator.shutdown().await;
}
