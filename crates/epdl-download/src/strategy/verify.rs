//! Post-remux output checks.

use std::sync::LazyLock;

use regex::Regex;

use epdl_core::ports::VerificationPolicy;
use epdl_core::{DownloadError, IntegrityKind};

static MOVIE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)movie").expect("movie title pattern is valid"));
static MOVIE_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)movie|full").expect("movie episode pattern is valid"));

/// Whether a title looks like a feature-length release.
pub fn is_movie_like(anime_title: &str, episode_name: &str) -> bool {
    MOVIE_TITLE.is_match(anime_title) || MOVIE_EPISODE.is_match(episode_name)
}

/// Reject remux output that looks truncated or is suspiciously small.
///
/// `source_secs` is the probed input duration (0 when unknown),
/// `output_secs` what the remuxer produced, `size` the output file length.
pub fn verify_remux_output(
    policy: &VerificationPolicy,
    movie_like: bool,
    source_secs: f64,
    output_secs: f64,
    size: u64,
) -> Result<(), DownloadError> {
    if source_secs > policy.min_trusted_duration_secs {
        let floor = source_secs * (1.0 - policy.duration_tolerance);
        if output_secs < floor {
            return Err(DownloadError::integrity(
                IntegrityKind::Truncated,
                format!("expected {source_secs:.0}s, got {output_secs:.0}s"),
            ));
        }
    }

    if movie_like && output_secs < policy.movie_min_duration_secs {
        return Err(DownloadError::integrity(
            IntegrityKind::Truncated,
            format!("movie output is only {output_secs:.0}s long"),
        ));
    }

    let min_bytes = if movie_like {
        policy.movie_min_bytes
    } else {
        policy.min_bytes
    };
    if size < min_bytes {
        return Err(DownloadError::integrity(
            IntegrityKind::Undersized,
            format!(
                "file is {} MB, below the {} MB minimum; the link may have expired",
                size / (1024 * 1024),
                min_bytes / (1024 * 1024)
            ),
        ));
    }
    Ok(())
}
