//! ffmpeg/ffprobe subprocess adapter.
//!
//! Spawns the remuxer with `-progress pipe:1`, streams its stdout through
//! [`ProgressParser`] and forwards reports to the caller. The child is
//! spawned with `kill_on_drop`, so dropping the `remux` future (worker
//! cancellation) terminates the session.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use epdl_core::DownloadError;
use epdl_core::ports::{RemuxJob, RemuxOutcome, RemuxStats, RemuxToolkitPort};

use super::protocol::{ProgressParser, parse_probe_duration};

/// Lines of stderr kept for failure reports.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Use `ffmpeg` and `ffprobe` from `PATH`.
    pub fn from_path() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }

    fn probe_args(url: &str, header_blob: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(blob) = header_blob.filter(|b| !b.is_empty()) {
            args.push("-headers".to_string());
            args.push(blob.to_string());
        }
        args.extend(
            [
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "-analyzeduration",
                "1000000",
                "-probesize",
                "1000000",
                "-timeout",
                "5000000",
            ]
            .iter()
            .map(ToString::to_string),
        );
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl RemuxToolkitPort for FfmpegToolkit {
    async fn probe_duration(&self, url: &str, header_blob: Option<&str>) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args(Self::probe_args(url, header_blob))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(status = %output.status, "ffprobe failed");
                None
            }
            Err(e) => {
                warn!(program = %self.ffprobe.display(), error = %e, "could not run ffprobe");
                None
            }
        }
    }

    async fn remux(
        &self,
        job: &RemuxJob,
        on_stats: &(dyn Fn(RemuxStats) + Send + Sync),
    ) -> Result<RemuxOutcome, DownloadError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-loglevel", "warning"])
            .args(["-progress", "pipe:1", "-nostats"])
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DownloadError::remux(format!(
                    "failed to spawn {}: {e}",
                    self.ffmpeg.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::remux("missing ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::remux("missing ffmpeg stderr"))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "ffmpeg");
                if tail.len() == STDERR_TAIL {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        });

        let mut parser = ProgressParser::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| DownloadError::remux(format!("reading ffmpeg progress: {e}")))?
        {
            match parser.feed(&line) {
                Ok(Some(report)) => on_stats(report.stats),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "ignoring ffmpeg progress line"),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::remux(format!("waiting for ffmpeg: {e}")))?;
        let tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            warn!(status = %status, stderr = %tail.join("\n"), "ffmpeg failed");
        }

        Ok(RemuxOutcome {
            success: status.success(),
            exit_code: status.code(),
            output_duration_secs: parser.stats().out_time_secs,
        })
    }
}
