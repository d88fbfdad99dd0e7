//! Parser for ffmpeg's `-progress` output.
//!
//! ffmpeg writes `key=value` lines and closes each report with a
//! `progress=continue` or `progress=end` line:
//!
//! ```text
//! out_time_us=12345678
//! total_size=1048576
//! progress=continue
//! ```
//!
//! Values may be `N/A` early in a session; those keep the previous value.

use thiserror::Error;

use epdl_core::ports::RemuxStats;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Line has no '=' separator: {0}")]
    MissingSeparator(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidNumber { key: String, value: String },
}

/// One completed progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub stats: RemuxStats,
    /// The session wrote its last report.
    pub finished: bool,
}

/// Accumulates `key=value` lines into reports.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: RemuxStats,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns a report when the line closes one.
    pub fn feed(&mut self, line: &str) -> Result<Option<ProgressReport>, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;
        let value = value.trim();

        match key.trim() {
            // `out_time_ms` is also microseconds, a long-standing ffmpeg quirk.
            "out_time_us" | "out_time_ms" => {
                if let Some(micros) = parse_number::<i64>(key, value)? {
                    #[allow(clippy::cast_precision_loss)]
                    let secs = micros.max(0) as f64 / 1_000_000.0;
                    self.current.out_time_secs = secs;
                }
            }
            "total_size" => {
                if let Some(size) = parse_number::<u64>(key, value)? {
                    self.current.total_size = size;
                }
            }
            "progress" => {
                return Ok(Some(ProgressReport {
                    stats: self.current,
                    finished: value == "end",
                }));
            }
            _ => {}
        }
        Ok(None)
    }

    pub const fn stats(&self) -> RemuxStats {
        self.current
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>, ProtocolError> {
    if value == "N/A" {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Parse ffprobe's bare duration output (`1420.512000`).
pub fn parse_probe_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}
