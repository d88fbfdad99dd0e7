//! Download command handler: add one episode, then run the queue.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::commands::EpisodeArgs;
use crate::handlers::{add, run};

pub async fn execute(ctx: &mut CliContext, args: &EpisodeArgs) -> Result<()> {
    add::queue(ctx, args).await?;
    run::execute(ctx).await
}
