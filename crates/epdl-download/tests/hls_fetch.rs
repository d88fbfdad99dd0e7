//! Native HLS downloads end to end through the manager.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Harness, anime, fast_config, payload, resolved};
use epdl_core::{DownloadEvent, DownloadPreferences, DownloadStatus};
use epdl_download::{EnqueueRequest, HlsConfig};

const BASE: &str = "https://cdn.test/show";

fn manifest_url() -> String {
    format!("{BASE}/index.m3u8")
}

fn segment_url(index: usize) -> String {
    format!("{BASE}/seg{index}.ts")
}

fn media_playlist(count: usize) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for index in 0..count {
        body.push_str(&format!("#EXTINF:4.0,\nseg{index}.ts\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}

fn segment_payload(index: usize) -> Vec<u8> {
    payload(100 + index, index as u8)
}

/// Script a manifest with `count` segments; `failing` ones always answer
/// with `status`, the rest complete after `delay(index)`.
fn script_stream(
    h: &Harness,
    count: usize,
    failing: &[usize],
    status: u16,
    delay: impl Fn(usize) -> Duration,
) -> Vec<u8> {
    h.http.body(&manifest_url(), media_playlist(count));
    let mut expected = Vec::new();
    for index in 0..count {
        if failing.contains(&index) {
            h.http.status(&segment_url(index), status);
        } else {
            let body = segment_payload(index);
            expected.extend_from_slice(&body);
            h.http.delayed_body(&segment_url(index), body, delay(index));
        }
    }
    expected
}

async fn download_one(h: &Harness) {
    let request = EnqueueRequest::new(anime(), vec![resolved(1, &manifest_url())]);
    h.manager.enqueue(request, true).await.unwrap();
    h.wait_idle().await;
}

fn completed_bytes(h: &Harness) -> Vec<u8> {
    let completed = h
        .emitter
        .matching(|e| matches!(e, DownloadEvent::ItemCompleted { .. }));
    match completed.as_slice() {
        [DownloadEvent::ItemCompleted { path, .. }] => std::fs::read(path).unwrap(),
        other => panic!("expected one completion, got {other:?}"),
    }
}

fn with_concurrency(concurrency: usize) -> HlsConfig {
    HlsConfig {
        manifest_attempts: 1,
        segment_attempts: 2,
        backoff_unit: Duration::from_millis(1),
        concurrency: Some(concurrency),
        ..HlsConfig::default()
    }
}

#[tokio::test]
async fn segments_are_written_in_playlist_order() {
    let h = Harness::with_config(DownloadPreferences::default(), |root| {
        fast_config(root).with_hls(with_concurrency(6))
    });
    // Later segments finish first.
    let expected = script_stream(&h, 12, &[], 404, |i| {
        Duration::from_millis(((12 - i) * 7 % 13) as u64 * 3)
    });

    download_one(&h).await;

    assert_eq!(completed_bytes(&h), expected);
    assert!(h.failures().is_empty());
    assert_eq!(h.remux.sessions(), 0);
}

#[tokio::test]
async fn blocked_segment_is_skipped() {
    let h = Harness::new(DownloadPreferences::default());
    let expected = script_stream(&h, 10, &[7], 403, |_| Duration::ZERO);

    download_one(&h).await;

    assert_eq!(completed_bytes(&h), expected);
    assert_eq!(h.http.requests_to(&segment_url(7)), 2);
    assert!(h.manager.snapshot().await.is_empty());
}

#[tokio::test]
async fn twenty_percent_missing_segments_is_accepted() {
    let h = Harness::new(DownloadPreferences::default());
    let failing: Vec<usize> = (0..100).step_by(5).collect();
    assert_eq!(failing.len(), 20);
    let expected = script_stream(&h, 100, &failing, 404, |_| Duration::ZERO);

    download_one(&h).await;

    assert_eq!(completed_bytes(&h), expected);
    assert_eq!(h.remux.sessions(), 0);
}

#[tokio::test]
async fn more_than_twenty_percent_missing_is_rejected() {
    let h = Harness::new(DownloadPreferences::default());
    let mut failing: Vec<usize> = (0..100).step_by(5).collect();
    failing.push(1);
    script_stream(&h, 100, &failing, 404, |_| Duration::ZERO);

    download_one(&h).await;

    // The rejected stream went to the remux fallback, which failed too.
    assert_eq!(h.remux.sessions(), 1);
    let snapshot = h.manager.snapshot().await;
    assert_eq!(snapshot.count(DownloadStatus::Error), 1);
    assert_eq!(h.failures().len(), 1);

    let item = &snapshot.items[0];
    let tmp_dir = h.manager.layout().tmp_dir(item);
    let leftovers: Vec<_> = std::fs::read_dir(&tmp_dir)
        .map(|entries| entries.filter_map(Result::ok).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "partial output left behind: {leftovers:?}");
}

#[tokio::test]
async fn buffered_segments_never_exceed_the_gate() {
    let h = Harness::with_config(DownloadPreferences::default(), |root| {
        fast_config(root)
            .with_buffer_slots(3)
            .with_hls(with_concurrency(8))
    });
    // The first segment is the slowest, so everything behind it piles up.
    let expected = script_stream(&h, 24, &[], 404, |i| {
        Duration::from_millis(if i % 6 == 0 { 30 } else { 2 })
    });

    let peak = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&peak);
    let governor = h.manager.governor().clone();
    let sampler = tokio::spawn(async move {
        loop {
            seen.fetch_max(governor.buffers_in_use(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    download_one(&h).await;
    sampler.abort();

    assert_eq!(completed_bytes(&h), expected);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(h.manager.governor().buffers_in_use(), 0);
}

#[tokio::test]
async fn master_playlist_follows_the_highest_bandwidth_variant() {
    let h = Harness::new(DownloadPreferences::default());
    h.http.body(
        &manifest_url(),
        "#EXTM3U\n\
         #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
         low/index.m3u8\n\
         #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720\n\
         high/index.m3u8\n",
    );
    h.http.body(&format!("{BASE}/high/index.m3u8"), media_playlist(3));
    let mut expected = Vec::new();
    for index in 0..3 {
        let body = segment_payload(index);
        expected.extend_from_slice(&body);
        h.http.body(&format!("{BASE}/high/seg{index}.ts"), body);
    }

    download_one(&h).await;

    assert_eq!(completed_bytes(&h), expected);
    assert_eq!(h.http.requests_to(&format!("{BASE}/low/index.m3u8")), 0);
}

#[tokio::test]
async fn encrypted_streams_fall_back_to_remux() {
    let h = Harness::new(DownloadPreferences::default());
    h.http.body(
        &manifest_url(),
        "#EXTM3U\n\
         #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
         #EXTINF:4.0,\n\
         seg0.ts\n\
         #EXT-X-ENDLIST\n",
    );

    download_one(&h).await;

    assert_eq!(h.remux.sessions(), 1);
    assert_eq!(h.http.requests_to(&segment_url(0)), 0);
    let failures = h.failures();
    assert!(matches!(
        failures.as_slice(),
        [DownloadEvent::Failed { message, .. }] if message.starts_with("ffmpeg failed")
    ));
}
