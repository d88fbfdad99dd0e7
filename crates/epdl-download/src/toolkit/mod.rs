//! Remux toolkit adapters.

mod ffmpeg;
mod protocol;

pub use ffmpeg::FfmpegToolkit;
pub use protocol::{ProgressParser, ProgressReport, ProtocolError, parse_probe_duration};
