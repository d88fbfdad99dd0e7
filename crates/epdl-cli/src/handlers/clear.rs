//! Clear command handler.

use anyhow::Result;

use crate::bootstrap::CliContext;

pub async fn execute(ctx: &CliContext) -> Result<()> {
    let count = ctx.manager().snapshot().await.len();
    ctx.manager().clear_queue().await?;
    println!("Cleared {count} item(s) from the queue.");
    Ok(())
}
