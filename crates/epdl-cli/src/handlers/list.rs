//! List command handler.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::presentation::{print_separator, status_label, truncate_string};

/// Print the queue in order, either as a table or as JSON.
pub async fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let snapshot = ctx.manager().snapshot().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.summaries())?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("The download queue is empty.");
        println!("Use 'epdl add <url> --title <anime>' to queue an episode.");
        return Ok(());
    }

    println!("{} item(s) in the queue:\n", snapshot.len());
    println!(
        "{:<14} {:<12} {:>4}  {:<28} {:<20} Error",
        "Key", "Status", "%", "Anime", "Episode"
    );
    print_separator(96);

    for item in &snapshot.items {
        println!(
            "{:<14} {:<12} {:>4}  {:<28} {:<20} {}",
            item.key().to_string(),
            status_label(item.status),
            item.progress,
            truncate_string(&item.anime.title, 27),
            truncate_string(&item.episode.name, 19),
            item.error.as_deref().unwrap_or("--"),
        );
    }
    Ok(())
}
