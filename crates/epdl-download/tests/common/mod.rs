//! Shared test doubles for the engine integration tests.
//!
//! Nothing here touches the network or spawns processes: HTTP replies are
//! scripted per URL, media comes from a scripted source and remux sessions
//! are simulated.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use epdl_core::ports::{
    DownloadEventEmitterPort, ExternalDownloaderPort, HandoffRequest, MemoryQueueStore,
    RecordingDownloadEmitter, RemuxJob, RemuxOutcome, RemuxStats, RemuxToolkitPort, SourcePort,
    UnavailableTorrentService,
};
use epdl_core::{
    AnimeId, AnimeRef, DownloadError, DownloadEvent, DownloadPreferences, DownloadStatus,
    EpisodeId, EpisodeRef, EpisodeRequest, HeaderList, PreferencesHandle, QueueSnapshot,
    ResolvedMedia, SourceId,
};
use epdl_download::http::{HttpBackend, HttpRequest, HttpResponse};
use epdl_download::{DownloadManager, DownloadManagerDeps, EngineConfig, HlsConfig, RangeConfig};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

/// A latch that holds requests until opened.
#[derive(Clone)]
pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(watch::Sender::new(false)))
    }

    pub fn open(&self) {
        self.0.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Clone)]
enum Reply {
    Status(u16),
    Body(Bytes),
    /// Honours `Range` requests against the whole blob.
    Ranged(Bytes),
    /// Sends the response head for a `len`-byte file, then never a byte.
    Stalled { len: u64 },
}

#[derive(Clone)]
struct Route {
    reply: Reply,
    delay: Duration,
    /// Extra per-range delay that scrambles completion order.
    jitter: Option<Duration>,
    gate: Option<Gate>,
    /// Remaining requests answered with the given status before `reply`.
    failures: Option<(Arc<AtomicUsize>, u16)>,
    /// Ranged requests starting at or past this offset answer 500.
    broken_from: Option<u64>,
}

impl Route {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            jitter: None,
            gate: None,
            failures: None,
            broken_from: None,
        }
    }
}

/// HTTP backend answering from a per-URL script.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn body(&self, url: &str, body: impl Into<Bytes>) {
        self.route(url, Route::new(Reply::Body(body.into())));
    }

    pub fn delayed_body(&self, url: &str, body: impl Into<Bytes>, delay: Duration) {
        self.route(
            url,
            Route {
                delay,
                ..Route::new(Reply::Body(body.into()))
            },
        );
    }

    pub fn status(&self, url: &str, status: u16) {
        self.route(url, Route::new(Reply::Status(status)));
    }

    pub fn ranged(&self, url: &str, blob: impl Into<Bytes>) {
        self.route(url, Route::new(Reply::Ranged(blob.into())));
    }

    /// A ranged file whose span requests complete out of order.
    pub fn jittered(&self, url: &str, blob: impl Into<Bytes>, unit: Duration) {
        self.route(
            url,
            Route {
                jitter: Some(unit),
                ..Route::new(Reply::Ranged(blob.into()))
            },
        );
    }

    /// A ranged file whose first `times` requests answer with `status`.
    pub fn flaky(&self, url: &str, blob: impl Into<Bytes>, times: usize, status: u16) {
        self.route(
            url,
            Route {
                failures: Some((Arc::new(AtomicUsize::new(times)), status)),
                ..Route::new(Reply::Ranged(blob.into()))
            },
        );
    }

    /// A ranged file that cannot serve anything from `offset` on.
    pub fn broken_from(&self, url: &str, blob: impl Into<Bytes>, offset: u64) {
        self.route(
            url,
            Route {
                broken_from: Some(offset),
                ..Route::new(Reply::Ranged(blob.into()))
            },
        );
    }

    /// A ranged file whose body never arrives.
    pub fn stalled(&self, url: &str, len: u64) {
        self.route(url, Route::new(Reply::Stalled { len }));
    }

    /// A ranged file whose requests wait for `gate`.
    pub fn gated(&self, url: &str, blob: impl Into<Bytes>, gate: &Gate) {
        self.route(
            url,
            Route {
                gate: Some(gate.clone()),
                ..Route::new(Reply::Ranged(blob.into()))
            },
        );
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    pub fn ranged_requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.range.is_some())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpBackend for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DownloadError> {
        self.requests.lock().unwrap().push(request.clone());
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        let Some(route) = route else {
            return Ok(HttpResponse::from_bytes(404, Bytes::new()));
        };
        if let Some((left, status)) = &route.failures {
            if left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(HttpResponse::from_bytes(*status, Bytes::new()));
            }
        }
        if let (Some(offset), Some(range)) = (route.broken_from, request.range) {
            if range.start >= offset {
                return Ok(HttpResponse::from_bytes(500, Bytes::new()));
            }
        }
        if let Some(gate) = &route.gate {
            gate.pass().await;
        }
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        if let (Some(unit), Some(range)) = (route.jitter, request.range) {
            let steps = u32::try_from(range.start.wrapping_mul(7919) % 7).unwrap();
            tokio::time::sleep(unit * steps).await;
        }

        Ok(match route.reply {
            Reply::Status(status) => HttpResponse::from_bytes(status, Bytes::new()),
            Reply::Body(body) => HttpResponse::from_bytes(200, body),
            Reply::Ranged(blob) => match request.range {
                None => HttpResponse::from_bytes(200, blob),
                Some(range) => {
                    let len = blob.len() as u64;
                    let end = range.end.unwrap_or(len - 1).min(len - 1);
                    let start = usize::try_from(range.start).unwrap();
                    let slice = blob.slice(start..=usize::try_from(end).unwrap());
                    HttpResponse::from_bytes(206, slice)
                        .with_content_range(format!("bytes {}-{end}/{len}", range.start))
                }
            },
            Reply::Stalled { len } => {
                let start = request.range.map_or(0, |r| r.start);
                HttpResponse {
                    status: 206,
                    content_length: Some(len - start),
                    content_range: Some(format!("bytes {start}-{}/{len}", len - 1)),
                    body: Box::pin(futures_util::stream::pending::<Result<Bytes, DownloadError>>()),
                }
            }
        })
    }
}

/// Source that resolves episodes from a fixed table.
#[derive(Default)]
pub struct ScriptedSource {
    media: Mutex<HashMap<EpisodeId, ResolvedMedia>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, episode: EpisodeId, media: ResolvedMedia) {
        self.media.lock().unwrap().insert(episode, media);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourcePort for ScriptedSource {
    async fn fetch_media(
        &self,
        _anime: &AnimeRef,
        episode: &EpisodeRef,
    ) -> Result<Vec<ResolvedMedia>, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .media
            .lock()
            .unwrap()
            .get(&episode.id)
            .cloned()
            .into_iter()
            .collect())
    }

    fn default_headers(&self, _source: SourceId) -> HeaderList {
        vec![("Referer".to_string(), "https://site.test/".to_string())]
    }
}

/// Remux toolkit that never produces output.
#[derive(Default)]
pub struct FailingRemux {
    sessions: AtomicUsize,
}

impl FailingRemux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemuxToolkitPort for FailingRemux {
    async fn probe_duration(&self, _url: &str, _header_blob: Option<&str>) -> Option<f64> {
        None
    }

    async fn remux(
        &self,
        _job: &RemuxJob,
        _on_stats: &(dyn Fn(RemuxStats) + Send + Sync),
    ) -> Result<RemuxOutcome, DownloadError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(RemuxOutcome {
            success: false,
            exit_code: Some(1),
            output_duration_secs: 0.0,
        })
    }
}

/// External downloader that accepts every job and keeps the requests.
#[derive(Default)]
pub struct RecordingHandoff {
    requests: Mutex<Vec<HandoffRequest>>,
}

impl RecordingHandoff {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<HandoffRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalDownloaderPort for RecordingHandoff {
    async fn hand_off(&self, request: &HandoffRequest) -> Result<(), DownloadError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// A manager wired to test doubles.
pub struct Harness {
    pub manager: DownloadManager,
    pub http: Arc<ScriptedHttp>,
    pub source: Arc<ScriptedSource>,
    pub remux: Arc<FailingRemux>,
    pub handoff: Arc<RecordingHandoff>,
    pub emitter: RecordingDownloadEmitter,
    pub prefs: PreferencesHandle,
    pub root: tempfile::TempDir,
}

/// Engine settings that keep tests fast: no outer retries, millisecond
/// backoffs and a short debounce.
pub fn fast_config(root: &Path) -> EngineConfig {
    EngineConfig::new(root.to_path_buf())
        .with_retry(1, Duration::ZERO)
        .with_debounce(Duration::from_millis(10))
        .with_hls(HlsConfig {
            manifest_attempts: 1,
            segment_attempts: 2,
            backoff_unit: Duration::from_millis(1),
            ..HlsConfig::default()
        })
        .with_range(RangeConfig {
            attempts: 2,
            backoff_unit: Duration::from_millis(1),
            ..RangeConfig::default()
        })
}

impl Harness {
    pub fn new(prefs: DownloadPreferences) -> Self {
        Self::with_config(prefs, fast_config)
    }

    pub fn with_config(
        prefs: DownloadPreferences,
        config: impl FnOnce(&Path) -> EngineConfig,
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let http = ScriptedHttp::new();
        let source = ScriptedSource::new();
        let remux = FailingRemux::new();
        let handoff = RecordingHandoff::new();
        let emitter = RecordingDownloadEmitter::new();
        let prefs = PreferencesHandle::new(prefs);
        let emitter_port: Arc<dyn DownloadEventEmitterPort> = Arc::new(emitter.clone());

        let manager = DownloadManager::new(DownloadManagerDeps {
            store: Arc::new(MemoryQueueStore::new()),
            source: source.clone(),
            emitter: emitter_port,
            http: http.clone(),
            remux: remux.clone(),
            torrent: Arc::new(UnavailableTorrentService),
            external: handoff.clone(),
            prefs: prefs.clone(),
            config: config(root.path()),
        });
        Self {
            manager,
            http,
            source,
            remux,
            handoff,
            emitter,
            prefs,
            root,
        }
    }

    pub fn failures(&self) -> Vec<DownloadEvent> {
        self.emitter
            .matching(|e| matches!(e, DownloadEvent::Failed { .. }))
    }

    /// Wait until the queue satisfies `predicate`.
    pub async fn wait_for_queue(&self, predicate: impl Fn(&QueueSnapshot) -> bool) -> QueueSnapshot {
        let mut rx = self.manager.subscribe();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
            .await
            .expect("queue did not reach the expected state")
            .expect("queue closed");
        snapshot.clone()
    }

    pub async fn wait_idle(&self) {
        tokio::time::timeout(WAIT, self.manager.wait_idle())
            .await
            .expect("engine did not go idle");
    }
}

pub fn anime() -> AnimeRef {
    AnimeRef {
        id: AnimeId(1),
        title: "Show".to_string(),
        source_id: SourceId(9),
        source_name: "Test Source".to_string(),
    }
}

pub fn episode(id: i64) -> EpisodeRef {
    EpisodeRef {
        id: EpisodeId(id),
        name: format!("Episode {id}"),
        scanlator: None,
        source_order: id,
        url: format!("/episode/{id}"),
    }
}

/// Episode request carrying pre-resolved media.
pub fn resolved(id: i64, url: &str) -> EpisodeRequest {
    EpisodeRequest::new(episode(id)).with_resolved(ResolvedMedia::new(url))
}

pub fn downloading(snapshot: &QueueSnapshot) -> usize {
    snapshot.count(DownloadStatus::Downloading)
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
