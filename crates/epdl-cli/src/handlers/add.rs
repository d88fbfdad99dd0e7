//! Add command handler.

use anyhow::{Result, bail};

use epdl_core::{AnimeId, AnimeRef, EpisodeId, EpisodeRef, ResolvedMedia, SourceId};
use epdl_download::{EnqueueRequest, EpisodeRequest};

use crate::bootstrap::CliContext;
use crate::commands::EpisodeArgs;

/// Source id for episodes added by URL.
const DIRECT_SOURCE_ID: SourceId = SourceId(0);

/// Execute the add command. Nothing starts downloading.
pub async fn execute(ctx: &CliContext, args: &EpisodeArgs) -> Result<()> {
    if queue(ctx, args).await? {
        println!("Use 'epdl run' to start downloading.");
    }
    Ok(())
}

/// Enqueue one episode; returns whether it was added.
pub async fn queue(ctx: &CliContext, args: &EpisodeArgs) -> Result<bool> {
    let request = build_request(args)?;
    let label = format!("{} - {}", request.anime.title, episode_name(args));
    let outcome = ctx.manager().enqueue(request, false).await?;

    if outcome.added == 0 {
        println!("{label} is already queued or downloaded.");
        Ok(false)
    } else {
        println!("Queued {label}.");
        Ok(true)
    }
}

/// Turn command-line arguments into an enqueue request with the stream
/// already resolved.
pub fn build_request(args: &EpisodeArgs) -> Result<EnqueueRequest> {
    let url = args.url.trim();
    if url.is_empty() {
        bail!("the media URL is empty");
    }
    let title = args.title.trim();
    if title.is_empty() {
        bail!("the anime title is empty");
    }

    let anime = AnimeRef {
        id: AnimeId(args.anime_id.unwrap_or_else(|| title_id(title))),
        title: title.to_string(),
        source_id: DIRECT_SOURCE_ID,
        source_name: args.source.clone(),
    };
    let episode = EpisodeRef {
        id: EpisodeId(args.episode_id.unwrap_or(args.number)),
        name: episode_name(args),
        scanlator: args.scanlator.clone(),
        source_order: args.number,
        url: url.to_string(),
    };

    let mut media = ResolvedMedia::new(url);
    if let Some(quality) = &args.quality {
        media = media.with_quality(quality.clone());
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        media = media.with_header(name, value);
    }

    let episode = EpisodeRequest::new(episode)
        .with_resolved(media)
        .with_change_downloader(args.change_downloader);
    Ok(EnqueueRequest::new(anime, vec![episode]))
}

fn episode_name(args: &EpisodeArgs) -> String {
    args.episode_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| format!("Episode {}", args.number), str::to_string)
}

/// Split `"Name: value"`.
fn parse_header(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("invalid header {raw:?}, expected \"Name: value\""),
    }
}

/// Stable identifier for a title (FNV-1a, case-insensitive).
///
/// Re-adding the same show always lands in the same queue group.
fn title_id(title: &str) -> i64 {
    let hash = title
        .to_lowercase()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    i64::try_from(hash >> 1).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str) -> EpisodeArgs {
        EpisodeArgs {
            url: url.to_string(),
            title: "Show".to_string(),
            number: 4,
            episode_name: None,
            source: "Direct".to_string(),
            anime_id: None,
            episode_id: None,
            headers: vec!["Referer: https://site.example/watch?a=1".to_string()],
            quality: Some("1080p".to_string()),
            scanlator: None,
            change_downloader: true,
        }
    }

    #[test]
    fn test_request_carries_resolved_media() {
        let request = build_request(&args("https://cdn.example/ep4.m3u8")).unwrap();
        assert_eq!(request.anime.title, "Show");
        assert_eq!(request.episodes.len(), 1);

        let episode = &request.episodes[0];
        assert_eq!(episode.episode.id, EpisodeId(4));
        assert_eq!(episode.episode.name, "Episode 4");
        assert_eq!(episode.episode.source_order, 4);
        assert!(episode.change_downloader);

        let media = episode.resolved.as_ref().unwrap();
        assert_eq!(media.url, "https://cdn.example/ep4.m3u8");
        assert_eq!(media.quality, "1080p");
        assert_eq!(media.header("referer"), Some("https://site.example/watch?a=1"));
    }

    #[test]
    fn test_title_id_is_stable_and_case_insensitive() {
        assert_eq!(title_id("Show"), title_id("show"));
        assert_ne!(title_id("Show"), title_id("Other Show"));
        assert!(title_id("Show") >= 0);

        let first = build_request(&args("https://cdn.example/a.mp4")).unwrap();
        let second = build_request(&args("https://cdn.example/b.mp4")).unwrap();
        assert_eq!(first.anime.id, second.anime.id);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(build_request(&args("  ")).is_err());

        let mut bad_header = args("https://cdn.example/a.mp4");
        bad_header.headers = vec!["no separator".to_string()];
        assert!(build_request(&bad_header).is_err());
    }
}
