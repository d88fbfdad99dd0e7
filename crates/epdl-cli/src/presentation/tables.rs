//! Table formatting utilities for CLI output.

use epdl_core::DownloadStatus;

/// Truncates a string to `max_len` characters, adding "..." if needed.
///
/// # Examples
///
/// ```rust
/// use epdl_cli::presentation::truncate_string;
///
/// assert_eq!(truncate_string("Hello", 10), "Hello");
/// assert_eq!(truncate_string("Hello World", 8), "Hello...");
/// ```
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Print a horizontal separator line.
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Short column text for a queue status.
pub const fn status_label(status: DownloadStatus) -> &'static str {
    match status {
        DownloadStatus::NotDownloaded => "idle",
        DownloadStatus::Queued => "queued",
        DownloadStatus::Downloading => "downloading",
        DownloadStatus::Downloaded => "done",
        DownloadStatus::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate_string("進撃の巨人 The Final Season", 8), "進撃の巨人...");
        assert_eq!(truncate_string("短い", 8), "短い");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(DownloadStatus::Queued), "queued");
        assert_eq!(status_label(DownloadStatus::Error), "error");
    }
}
