//! Queue, scheduler and facade behaviour against scripted transports.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_test::assert_ok;

use common::{Gate, Harness, anime, downloading, payload, resolved};
use epdl_core::{
    AnimeId, DownloadEvent, DownloadKey, DownloadPreferences, DownloadStatus, EpisodeId,
    EpisodeRequest, ResolvedMedia,
};
use epdl_download::EnqueueRequest;

fn url(id: i64) -> String {
    format!("https://cdn.test/episode-{id}.mp4")
}

fn key(id: i64) -> DownloadKey {
    DownloadKey::new(AnimeId(1), EpisodeId(id))
}

/// Script one gated progressive file per episode.
fn gated_episodes(h: &Harness, ids: &[i64]) -> Vec<Gate> {
    ids.iter()
        .map(|&id| {
            let gate = Gate::closed();
            h.http.gated(&url(id), payload(2048, id as u8), &gate);
            gate
        })
        .collect()
}

fn request(ids: &[i64]) -> EnqueueRequest {
    EnqueueRequest::new(anime(), ids.iter().map(|&id| resolved(id, &url(id))).collect())
}

fn limit(count: usize) -> DownloadPreferences {
    DownloadPreferences::default().with_concurrent_downloads(count)
}

#[tokio::test]
async fn duplicate_enqueue_keeps_one_entry() {
    let h = Harness::new(DownloadPreferences::default());

    let first = h.manager.enqueue(request(&[1]), false).await.unwrap();
    let second = h.manager.enqueue(request(&[1]), false).await.unwrap();

    assert_eq!(first.added, 1);
    assert_eq!((second.added, second.skipped), (0, 1));
    assert_eq!(h.manager.snapshot().await.len(), 1);
}

#[tokio::test]
async fn concurrency_cap_holds_and_backfills() {
    let h = Harness::new(limit(2));
    let gates = gated_episodes(&h, &[1, 2, 3]);

    let mut rx = h.manager.subscribe();
    let peak = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&peak);
    let monitor = tokio::spawn(async move {
        loop {
            let active = downloading(&rx.borrow_and_update());
            seen.fetch_max(active, Ordering::SeqCst);
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    let outcome = h.manager.enqueue(request(&[1, 2, 3]), true).await.unwrap();
    assert!(outcome.started);

    // Newest first: episodes 3 and 2 run, episode 1 waits.
    let snapshot = h.wait_for_queue(|s| downloading(s) == 2).await;
    assert_eq!(snapshot.get(&key(1)).unwrap().status, DownloadStatus::Queued);
    assert_eq!(snapshot.count(DownloadStatus::Queued), 1);

    gates[2].open();
    let snapshot = h
        .wait_for_queue(|s| {
            !s.items.iter().any(|i| i.key() == key(3))
                && s.get(&key(1))
                    .is_some_and(|i| i.status == DownloadStatus::Downloading)
        })
        .await;
    assert_eq!(downloading(&snapshot), 2);

    for gate in &gates {
        gate.open();
    }
    h.wait_idle().await;
    monitor.abort();

    assert!(h.manager.snapshot().await.is_empty());
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(
        h.emitter
            .matching(|e| matches!(e, DownloadEvent::ItemCompleted { .. }))
            .len(),
        3
    );
    assert!(matches!(h.emitter.events().last(), Some(DownloadEvent::QueueFinished)));
}

#[tokio::test]
async fn completed_file_lands_in_final_directory() {
    let h = Harness::new(DownloadPreferences::default());
    let body = payload(10_000, 7);
    h.http.ranged(&url(1), body.clone());

    h.manager.enqueue(request(&[1]), true).await.unwrap();
    h.wait_idle().await;

    let completed = h
        .emitter
        .matching(|e| matches!(e, DownloadEvent::ItemCompleted { .. }));
    let Some(DownloadEvent::ItemCompleted { path, .. }) = completed.first() else {
        panic!("no completion event");
    };
    assert_eq!(std::fs::read(path).unwrap(), body);
    assert!(path.parent().unwrap().join(epdl_download::NO_MEDIA_FILE).exists());
    assert!(path.parent().unwrap().ends_with("Show/Episode 1"));
}

#[tokio::test]
async fn pause_returns_in_flight_items_to_the_queue() {
    let h = Harness::new(limit(2));
    let gates = gated_episodes(&h, &[1, 2, 3]);

    h.manager.enqueue(request(&[1, 2, 3]), true).await.unwrap();
    h.wait_for_queue(|s| downloading(s) == 2).await;

    h.manager.pause().await;

    let snapshot = h.manager.snapshot().await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.count(DownloadStatus::Queued), 3);
    assert_eq!(snapshot.count(DownloadStatus::Error), 0);
    assert!(h.failures().is_empty());
    assert!(!h.manager.is_running().await);

    // Resuming picks the same items up again.
    for gate in &gates {
        gate.open();
    }
    assert!(h.manager.start().await);
    h.wait_idle().await;
    assert!(h.manager.snapshot().await.is_empty());
}

#[tokio::test]
async fn stop_marks_in_flight_items_failed() {
    let h = Harness::new(limit(1));
    let _gates = gated_episodes(&h, &[1, 2]);

    h.manager.enqueue(request(&[1, 2]), true).await.unwrap();
    h.wait_for_queue(|s| downloading(s) == 1).await;

    h.manager.stop(Some("storage full".to_string())).await;

    let snapshot = h.manager.snapshot().await;
    assert_eq!(snapshot.count(DownloadStatus::Error), 1);
    assert_eq!(snapshot.count(DownloadStatus::Queued), 1);
    assert!(matches!(
        h.emitter.events().last(),
        Some(DownloadEvent::Warning { message }) if message == "storage full"
    ));
}

#[tokio::test]
async fn removing_unknown_items_is_a_no_op() {
    let h = Harness::new(DownloadPreferences::default());
    h.manager.enqueue(request(&[1, 2]), false).await.unwrap();
    let before = h.manager.snapshot().await;

    assert_eq!(h.manager.remove_episodes(&[key(99)]).await.unwrap(), 0);
    assert_eq!(h.manager.remove_anime(AnimeId(42)).await.unwrap(), 0);
    assert_eq!(h.manager.snapshot().await, before);

    assert_eq!(h.manager.remove_episodes(&[key(1)]).await.unwrap(), 1);
    assert_eq!(h.manager.remove_episodes(&[key(1)]).await.unwrap(), 0);
    assert_eq!(h.manager.snapshot().await.len(), 1);

    assert_ok!(h.manager.clear_queue().await);
    assert!(h.manager.snapshot().await.is_empty());
}

#[tokio::test]
async fn removing_a_downloading_item_cancels_its_worker() {
    let h = Harness::new(DownloadPreferences::default());
    let _gates = gated_episodes(&h, &[1]);

    h.manager.enqueue(request(&[1]), true).await.unwrap();
    h.wait_for_queue(|s| downloading(s) == 1).await;

    assert_eq!(h.manager.remove_episodes(&[key(1)]).await.unwrap(), 1);
    h.wait_idle().await;

    assert!(h.manager.snapshot().await.is_empty());
    assert!(h.failures().is_empty());
    assert!(matches!(h.emitter.events().last(), Some(DownloadEvent::QueueFinished)));
}

#[tokio::test]
async fn raising_the_limit_starts_more_workers() {
    let h = Harness::new(limit(1));
    let gates = gated_episodes(&h, &[1, 2, 3]);

    h.manager.enqueue(request(&[1, 2, 3]), true).await.unwrap();
    h.wait_for_queue(|s| downloading(s) == 1).await;

    h.prefs.update(limit(3)).unwrap();
    h.wait_for_queue(|s| downloading(s) == 3).await;

    for gate in &gates {
        gate.open();
    }
    h.wait_idle().await;
}

#[tokio::test]
async fn media_is_resolved_through_the_source() {
    let h = Harness::new(DownloadPreferences::default());
    h.http.ranged(&url(5), payload(4096, 5));
    h.source
        .add(EpisodeId(5), ResolvedMedia::new(url(5)).with_quality("720p"));

    let request = EnqueueRequest::new(
        anime(),
        vec![
            EpisodeRequest::new(common::episode(5)),
            EpisodeRequest::new(common::episode(6)),
        ],
    );
    h.manager.enqueue(request, true).await.unwrap();
    h.wait_idle().await;

    assert_eq!(h.source.calls(), 2);
    let snapshot = h.manager.snapshot().await;
    assert_eq!(snapshot.len(), 1, "only the unresolvable episode is left");
    assert_eq!(snapshot.get(&key(6)).unwrap().status, DownloadStatus::Error);

    let failures = h.failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        DownloadEvent::Failed { message, .. } if message.contains("no video available")
    ));
    assert!(matches!(h.emitter.events().last(), Some(DownloadEvent::Paused)));
}
