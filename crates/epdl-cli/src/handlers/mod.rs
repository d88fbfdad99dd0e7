//! Command handlers.
//!
//! Handlers follow one pattern:
//! - Signature: `pub async fn execute(ctx: &CliContext, ...) -> Result<()>`
//! - Thin wrappers that validate CLI input, call the [`DownloadManager`]
//!   and format output for the terminal
//!
//! [`DownloadManager`]: epdl_download::DownloadManager

pub mod add;
pub mod clear;
pub mod download;
pub mod list;
pub mod remove;
pub mod run;
