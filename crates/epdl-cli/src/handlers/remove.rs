//! Remove command handler.

use anyhow::Result;

use epdl_core::{AnimeId, DownloadKey, EpisodeId};

use crate::bootstrap::CliContext;

/// Remove episodes of one anime, or all of them when none are named.
///
/// Unknown episodes are ignored.
pub async fn execute(ctx: &CliContext, anime_id: i64, episode_ids: &[i64]) -> Result<()> {
    let removed = if episode_ids.is_empty() {
        ctx.manager().remove_anime(AnimeId(anime_id)).await?
    } else {
        let keys: Vec<DownloadKey> = episode_ids
            .iter()
            .map(|&id| DownloadKey::new(AnimeId(anime_id), EpisodeId(id)))
            .collect();
        ctx.manager().remove_episodes(&keys).await?
    };

    match removed {
        0 => println!("Nothing matched; the queue is unchanged."),
        1 => println!("Removed 1 item."),
        n => println!("Removed {n} items."),
    }
    Ok(())
}
