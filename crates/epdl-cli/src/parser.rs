//! Root CLI structure with global options.
//!
//! Every path and service location can be given as a flag or through the
//! matching `EPDL_*` environment variable (a `.env` file is honoured).

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Queue and download episodes into a local library.
#[derive(Parser)]
#[command(name = "epdl")]
#[command(about = "Queue and download anime episodes into a local library")]
#[command(version)]
pub struct Cli {
    /// Library root; episodes land in `<root>/<source>/<anime>/<episode>/`
    #[arg(long = "downloads-dir", env = "EPDL_DOWNLOADS_DIR", global = true)]
    pub downloads_dir: Option<PathBuf>,

    /// Queue database file
    #[arg(long = "db", env = "EPDL_DB", global = true)]
    pub database: Option<PathBuf>,

    /// ffmpeg executable used by the remux fallback
    #[arg(long, env = "EPDL_FFMPEG", global = true, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe executable used for duration checks
    #[arg(long, env = "EPDL_FFPROBE", global = true, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Base URL of the `TorrServer` instance used for torrent episodes
    #[arg(
        long = "torrserver-url",
        env = "EPDL_TORRSERVER_URL",
        global = true,
        default_value = epdl_download::DEFAULT_TORRSERVER_URL
    )]
    pub torrserver_url: String,

    /// Start this `TorrServer` binary when the server is not running
    #[arg(long = "torrserver-bin", global = true)]
    pub torrserver_bin: Option<PathBuf>,

    /// Episodes downloaded at once
    #[arg(short = 'c', long, global = true)]
    pub concurrency: Option<usize>,

    /// Worker count for ranged downloads
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Hand episodes to this external program instead of downloading them
    #[arg(long = "external-downloader", global = true)]
    pub external_downloader: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
