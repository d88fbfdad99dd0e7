//! Run command handler.
//!
//! Starts the engine, renders its events until the queue goes idle and
//! pauses cleanly on Ctrl-C. Paused and failed items stay queued for the
//! next run.

use anyhow::{Context, Result};

use epdl_core::DownloadStatus;

use crate::bootstrap::CliContext;
use crate::presentation::QueueProgress;

pub async fn execute(ctx: &mut CliContext) -> Result<()> {
    let manager = ctx.manager().clone();
    let mut events = ctx
        .take_events()
        .context("the event stream was already consumed")?;

    let snapshot = manager.snapshot().await;
    if snapshot.is_empty() {
        println!("The download queue is empty.");
        return Ok(());
    }
    if !manager.start().await && !manager.is_running().await {
        println!("Nothing to download.");
        return Ok(());
    }
    println!("Downloading {} episode(s)...", snapshot.len());

    let mut progress = QueueProgress::new(&snapshot);
    let interrupt = tokio::signal::ctrl_c();
    let idle = manager.wait_idle();
    tokio::pin!(interrupt, idle);

    let mut interrupted = false;
    loop {
        tokio::select! {
            biased;
            result = &mut interrupt => {
                result.context("failed to listen for Ctrl-C")?;
                interrupted = true;
                manager.pause().await;
                break;
            }
            Some(event) = events.recv() => progress.handle(&event),
            () = &mut idle => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        progress.handle(&event);
    }
    let tally = progress.finish();

    println!(
        "Finished: {} downloaded, {} handed off, {} failed.",
        tally.completed, tally.handed_off, tally.failed
    );

    let left = manager.snapshot().await;
    if interrupted {
        println!(
            "Paused with {} item(s) left. Run 'epdl run' to resume.",
            left.len()
        );
    } else if left.count(DownloadStatus::Error) > 0 {
        println!(
            "{} failed item(s) stay in the queue; 'epdl run' retries them.",
            left.count(DownloadStatus::Error)
        );
    }
    tracing::debug!(
        completed = tally.completed,
        failed = tally.failed,
        handed_off = tally.handed_off,
        "run finished"
    );
    Ok(())
}
