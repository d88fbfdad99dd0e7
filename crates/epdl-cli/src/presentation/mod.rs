//! Terminal output for queue listings and download runs.

pub mod progress;
pub mod tables;

pub use progress::{QueueProgress, RunTally};
pub use tables::{print_separator, status_label, truncate_string};
