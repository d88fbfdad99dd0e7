//! Subcommands of the `epdl` binary.

use clap::{Args, Subcommand};

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Add an episode to the download queue without starting it
    Add(EpisodeArgs),

    /// Add an episode and download the whole queue
    Download(EpisodeArgs),

    /// Show the download queue
    List {
        /// Print the queue as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove queued episodes
    Remove {
        /// Anime the episodes belong to
        anime_id: i64,
        /// Episodes to remove; every episode of the anime when omitted
        episode_ids: Vec<i64>,
    },

    /// Remove every item from the queue
    Clear,

    /// Download the queue until it drains, showing progress
    Run,
}

/// A URL-backed episode to enqueue.
#[derive(Args, Debug, Clone)]
pub struct EpisodeArgs {
    /// Media URL: a direct file, an HLS playlist or a magnet/torrent link
    pub url: String,

    /// Anime title; also the library folder name
    #[arg(short, long)]
    pub title: String,

    /// Episode number, used for ordering and the default episode name
    #[arg(short, long, default_value_t = 1)]
    pub number: i64,

    /// Episode name; defaults to "Episode <number>"
    #[arg(short, long = "episode")]
    pub episode_name: Option<String>,

    /// Source name; the top-level library folder
    #[arg(long, default_value = "Direct")]
    pub source: String,

    /// Anime identifier; derived from the title when omitted
    #[arg(long = "anime-id")]
    pub anime_id: Option<i64>,

    /// Episode identifier; the episode number when omitted
    #[arg(long = "episode-id")]
    pub episode_id: Option<i64>,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Quality label of the stream, e.g. "1080p"
    #[arg(long)]
    pub quality: Option<String>,

    /// Release group
    #[arg(long)]
    pub scanlator: Option<String>,

    /// Invert the external downloader preference for this episode
    #[arg(long = "change-downloader")]
    pub change_downloader: bool,
}
