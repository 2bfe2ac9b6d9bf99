//! GitHub platform integration (via gh CLI)
//!
//! Implements the fetcher and executor seams from `prwatch-core` on top of
//! the `gh` CLI invoked as a subprocess.

mod execute;
mod fetch;
mod gh;

pub use execute::GhExecutor;
pub use fetch::{GhFetcher, OUTPUT_TITLE_MAX};
