//! Progress rendering for a queue run.
//!
//! Consumes the engine's event stream. On a terminal every episode in
//! flight gets its own bar; otherwise one line is printed per milestone.

use std::collections::HashMap;
use std::io::{self, IsTerminal};

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use epdl_core::{DownloadEvent, DownloadKey, DownloadStatus, QueueSnapshot};
use epdl_download::ProgressThrottle;

/// What happened during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunTally {
    pub completed: usize,
    pub failed: usize,
    pub handed_off: usize,
}

/// Renders [`DownloadEvent`]s as they arrive.
pub struct QueueProgress {
    render: Render,
    labels: HashMap<DownloadKey, String>,
    throttle: ProgressThrottle,
    tally: RunTally,
}

enum Render {
    Fancy(FancyRender),
    Plain,
}

impl QueueProgress {
    /// Create a renderer, auto-detecting terminal capability.
    pub fn new(snapshot: &QueueSnapshot) -> Self {
        let render = if io::stdout().is_terminal() {
            Render::Fancy(FancyRender::new())
        } else {
            Render::Plain
        };
        Self::with_render(render, snapshot)
    }

    /// Line-oriented renderer.
    pub fn plain(snapshot: &QueueSnapshot) -> Self {
        Self::with_render(Render::Plain, snapshot)
    }

    fn with_render(render: Render, snapshot: &QueueSnapshot) -> Self {
        let labels = snapshot
            .items
            .iter()
            .map(|item| {
                (
                    item.key(),
                    episode_label(&item.anime.title, &item.episode.name),
                )
            })
            .collect();
        Self {
            render,
            labels,
            throttle: ProgressThrottle::default(),
            tally: RunTally::default(),
        }
    }

    fn label(&self, key: DownloadKey) -> String {
        self.labels
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::QueueSnapshot { items } => {
                for item in items {
                    self.labels
                        .entry(item.key)
                        .or_insert_with(|| episode_label(&item.anime_title, &item.episode_name));
                }
            }
            DownloadEvent::StatusChanged { key, status } => {
                let label = self.label(*key);
                match status {
                    DownloadStatus::Downloading => self.render.start(*key, &label),
                    DownloadStatus::Queued => self.render.drop_bar(*key),
                    _ => {}
                }
            }
            DownloadEvent::Progress {
                key,
                progress,
                speed,
                downloaded_bytes,
                downloaded_segments,
                total_segments,
                ..
            } => {
                if self.throttle.should_emit(*key) {
                    let label = self.label(*key);
                    let detail = progress_detail(
                        speed,
                        *downloaded_bytes,
                        *downloaded_segments,
                        *total_segments,
                    );
                    self.render.update(*key, &label, *progress, &detail);
                }
            }
            DownloadEvent::Retrying {
                key,
                attempt,
                max_attempts,
                message,
            } => {
                let label = self.label(*key);
                self.render.line(&format!(
                    "  retrying {label} ({attempt}/{max_attempts}): {message}"
                ));
            }
            DownloadEvent::Failed {
                key,
                anime_title,
                episode_name,
                message,
            } => {
                self.tally.failed += 1;
                self.throttle.reset(*key);
                let label = episode_label(anime_title, episode_name);
                self.render
                    .finish(*key, &format!("✗ {label}: {message}"));
            }
            DownloadEvent::ItemCompleted { key, path } => {
                self.tally.completed += 1;
                self.throttle.reset(*key);
                let label = self.label(*key);
                self.render
                    .finish(*key, &format!("✓ {label} -> {}", path.display()));
            }
            DownloadEvent::HandedOff { key, program } => {
                self.tally.handed_off += 1;
                self.throttle.reset(*key);
                let label = self.label(*key);
                let program = program.as_deref().unwrap_or("external downloader");
                self.render
                    .finish(*key, &format!("→ {label} handed to {program}"));
            }
            DownloadEvent::Warning { message } => {
                self.render.line(&format!("! {message}"));
            }
            DownloadEvent::Paused | DownloadEvent::QueueFinished => {}
        }
    }

    /// Clear any remaining bars and return the run's tally.
    pub fn finish(&mut self) -> RunTally {
        self.render.close();
        self.tally
    }
}

/// `"<anime> - <episode>"`.
pub fn episode_label(anime_title: &str, episode_name: &str) -> String {
    format!("{anime_title} - {episode_name}")
}

/// Secondary text next to a bar: segments for HLS, bytes otherwise.
pub fn progress_detail(
    speed: &str,
    downloaded_bytes: u64,
    downloaded_segments: Option<u32>,
    total_segments: Option<u32>,
) -> String {
    let amount = match (downloaded_segments, total_segments) {
        (Some(done), Some(total)) => format!("{done}/{total} segments"),
        _ if downloaded_bytes > 0 => HumanBytes(downloaded_bytes).to_string(),
        _ => String::new(),
    };
    match (amount.is_empty(), speed.is_empty()) {
        (true, _) => speed.to_string(),
        (false, true) => amount,
        (false, false) => format!("{amount}  {speed}"),
    }
}

impl Render {
    fn start(&mut self, key: DownloadKey, label: &str) {
        match self {
            Self::Fancy(inner) => {
                inner.bar(key, label);
            }
            Self::Plain => println!("↓ {label}"),
        }
    }

    fn update(&mut self, key: DownloadKey, label: &str, percent: u8, detail: &str) {
        if let Self::Fancy(inner) = self {
            let bar = inner.bar(key, label);
            bar.set_position(u64::from(percent.min(100)));
            bar.set_message(format!("{label}  {detail}"));
        }
    }

    fn drop_bar(&mut self, key: DownloadKey) {
        if let Self::Fancy(inner) = self {
            if let Some(bar) = inner.bars.remove(&key) {
                bar.finish_and_clear();
            }
        }
    }

    fn finish(&mut self, key: DownloadKey, line: &str) {
        self.drop_bar(key);
        self.line(line);
    }

    fn line(&self, line: &str) {
        match self {
            Self::Fancy(inner) => {
                let _ = inner.multi.println(line);
            }
            Self::Plain => println!("{line}"),
        }
    }

    fn close(&mut self) {
        if let Self::Fancy(inner) = self {
            for (_, bar) in inner.bars.drain() {
                bar.finish_and_clear();
            }
            let _ = inner.multi.clear();
        }
    }
}

struct FancyRender {
    multi: MultiProgress,
    bars: HashMap<DownloadKey, ProgressBar>,
}

impl FancyRender {
    fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stdout()),
            bars: HashMap::new(),
        }
    }

    fn bar(&mut self, key: DownloadKey, label: &str) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(key).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(bar_style());
            bar.set_message(label.to_string());
            bar
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{bar:28.cyan/blue} {pos:>3}% {wide_msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("=> "))
}
