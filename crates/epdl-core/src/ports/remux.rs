//! Remux toolkit port (ffmpeg/ffprobe).
//!
//! The engine builds the argument list; the adapter owns the subprocess.
//! Dropping the future returned by [`RemuxToolkitPort::remux`] must
//! terminate the session.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::download::DownloadError;

/// One remux session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemuxJob {
    /// Arguments passed to the remux program, output path included.
    pub args: Vec<String>,
    pub output: PathBuf,
}

/// Periodic statistics reported while a session runs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RemuxStats {
    /// Media time written so far, in seconds.
    pub out_time_secs: f64,
    /// Bytes written so far.
    pub total_size: u64,
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemuxOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Duration of the produced output, in seconds.
    pub output_duration_secs: f64,
}

#[async_trait]
pub trait RemuxToolkitPort: Send + Sync {
    /// Source duration in seconds, or `None` when probing fails.
    async fn probe_duration(&self, url: &str, header_blob: Option<&str>) -> Option<f64>;

    async fn remux(
        &self,
        job: &RemuxJob,
        on_stats: &(dyn Fn(RemuxStats) + Send + Sync),
    ) -> Result<RemuxOutcome, DownloadError>;
}
