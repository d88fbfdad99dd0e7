//! `epdl` command-line front end.
//!
//! The binary wires the download engine to a `SQLite` queue store, the
//! reqwest HTTP backend, ffmpeg, `TorrServer` and a process-based external
//! downloader, then dispatches subcommands to thin handlers.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the binary only
use dotenvy as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod commands;
pub mod handlers;
pub mod handoff;
pub mod parser;
pub mod presentation;
pub mod source;

pub use bootstrap::{CliConfig, CliContext, bootstrap};
pub use commands::{Commands, EpisodeArgs};
pub use handoff::ProcessHandoff;
pub use parser::Cli;
pub use source::DirectUrlSource;
