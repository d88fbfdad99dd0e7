//! On-disk layout of downloaded episodes.
//!
//! ```text
//! <downloads>/<source>/<anime>/<episode>_tmp/<episode>.tmp   in progress
//! <downloads>/<source>/<anime>/<episode>_tmp/<episode>.mkv   fetched
//! <downloads>/<source>/<anime>/<episode>/<episode>.mkv       finalized
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use epdl_core::{DownloadError, DownloadItem};

/// Suffix of the working directory of an episode.
pub const TMP_DIR_SUFFIX: &str = "_tmp";

/// Marker that keeps media scanners out of download directories.
pub const NO_MEDIA_FILE: &str = ".nomedia";

const MAX_NAME_BYTES: usize = 240;

/// Make `name` safe as a single path component.
///
/// Reserved and control characters become `_`, trailing dots and spaces are
/// dropped and the result is capped at a safe byte length on a character
/// boundary. An empty result becomes `(invalid)`.
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let mut out = String::new();
    for c in replaced.chars() {
        if out.len() + c.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        out.push(c);
    }
    let out = out.trim_end_matches(['.', ' ']);
    if out.is_empty() {
        "(invalid)".to_string()
    } else {
        out.to_string()
    }
}

/// Directory naming for one downloads root.
#[derive(Debug, Clone)]
pub struct DownloadLayout {
    root: PathBuf,
}

impl DownloadLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn anime_dir(&self, item: &DownloadItem) -> PathBuf {
        self.root
            .join(sanitize(&item.anime.source_name))
            .join(sanitize(&item.anime.title))
    }

    /// Episode directory name, prefixed with the scanlator when known.
    pub fn episode_dir_name(item: &DownloadItem) -> String {
        match item.episode.scanlator.as_deref().map(str::trim) {
            Some(scanlator) if !scanlator.is_empty() => {
                sanitize(&format!("{scanlator}_{}", item.episode.name))
            }
            _ => sanitize(&item.episode.name),
        }
    }

    /// Base name of the media file, without extension.
    pub fn file_name(item: &DownloadItem) -> String {
        sanitize(&item.episode.name)
    }

    pub fn tmp_dir(&self, item: &DownloadItem) -> PathBuf {
        self.anime_dir(item)
            .join(format!("{}{TMP_DIR_SUFFIX}", Self::episode_dir_name(item)))
    }

    pub fn final_dir(&self, item: &DownloadItem) -> PathBuf {
        self.anime_dir(item).join(Self::episode_dir_name(item))
    }

    /// Whether the episode already has a finalized directory.
    pub fn is_downloaded(&self, item: &DownloadItem) -> bool {
        self.final_dir(item).is_dir()
    }
}

/// Promote a working directory holding exactly one media file to `final_dir`.
///
/// Leftover artifacts (a second file, a stray `.tmp`) are a finalization
/// error rather than something to pick from. On success the directory gets
/// a [`NO_MEDIA_FILE`] marker.
pub async fn finalize(tmp_dir: &Path, final_dir: &Path) -> Result<PathBuf, DownloadError> {
    let mut media = Vec::new();
    let mut entries = tokio::fs::read_dir(tmp_dir).await.map_err(|e| {
        DownloadError::finalization(format!("cannot read {}: {e}", tmp_dir.display()))
    })?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name == NO_MEDIA_FILE {
            continue;
        }
        if entry.file_type().await?.is_file() {
            media.push(name);
        }
    }

    if media.len() != 1 {
        return Err(DownloadError::finalization(format!(
            "expected one media file in {}, found {}",
            tmp_dir.display(),
            media.len()
        )));
    }
    if tokio::fs::try_exists(final_dir).await? {
        return Err(DownloadError::finalization(format!(
            "{} already exists",
            final_dir.display()
        )));
    }

    tokio::fs::rename(tmp_dir, final_dir).await.map_err(|e| {
        DownloadError::finalization(format!("cannot rename {}: {e}", tmp_dir.display()))
    })?;
    tokio::fs::write(final_dir.join(NO_MEDIA_FILE), b"").await?;
    debug!(dir = %final_dir.display(), "finalized episode directory");
    Ok(final_dir.join(&media[0]))
}

/// Best-effort removal of a working directory.
pub async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(dir = %dir.display(), error = %e, "could not remove directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epdl_core::{AnimeId, AnimeRef, EpisodeId, EpisodeRef, SourceId};

    fn item(scanlator: Option<&str>) -> DownloadItem {
        DownloadItem::new(
            AnimeRef {
                id: AnimeId(1),
                title: "Show: Part 2".to_string(),
                source_id: SourceId(3),
                source_name: "Site (EN)".to_string(),
            },
            EpisodeRef {
                id: EpisodeId(9),
                name: "Episode 1?".to_string(),
                scanlator: scanlator.map(str::to_string),
                source_order: 1,
                url: "/e/1".to_string(),
            },
        )
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize("a/b:c*d"), "a_b_c_d");
        assert_eq!(sanitize("  name.. "), "name");
        assert_eq!(sanitize("..."), "(invalid)");
        assert!(sanitize(&"é".repeat(200)).len() <= MAX_NAME_BYTES);
    }

    #[test]
    fn layout_nests_source_anime_episode() {
        let layout = DownloadLayout::new("/lib");
        let item = item(Some("Group"));
        assert_eq!(
            layout.tmp_dir(&item),
            PathBuf::from("/lib/Site (EN)/Show_ Part 2/Group_Episode 1__tmp")
        );
        assert_eq!(
            layout.final_dir(&item),
            PathBuf::from("/lib/Site (EN)/Show_ Part 2/Group_Episode 1_")
        );
        assert_eq!(DownloadLayout::file_name(&item), "Episode 1_");
        assert_eq!(DownloadLayout::episode_dir_name(&self::item(Some("  "))), "Episode 1_");
    }

    #[tokio::test]
    async fn finalize_renames_single_file_and_marks_no_media() {
        let root = tempfile::tempdir().unwrap();
        let tmp = root.path().join("ep_tmp");
        let done = root.path().join("ep");
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        tokio::fs::write(tmp.join("ep.mkv"), b"video").await.unwrap();

        let path = finalize(&tmp, &done).await.unwrap();
        assert_eq!(path, done.join("ep.mkv"));
        assert!(done.join(NO_MEDIA_FILE).exists());
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn finalize_rejects_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let tmp = root.path().join("ep_tmp");
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        tokio::fs::write(tmp.join("ep.mkv"), b"video").await.unwrap();
        tokio::fs::write(tmp.join("ep.tmp"), b"partial").await.unwrap();

        let err = finalize(&tmp, &root.path().join("ep")).await.unwrap_err();
        assert!(matches!(err, DownloadError::Finalization { .. }));
        assert!(tmp.join("ep.mkv").exists());
    }
}
