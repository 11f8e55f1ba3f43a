//! Command-line interface for taskforge.
//!
//! Provides commands for submitting jobs, driving their lifecycle, running
//! one-off agent invocations, and applying database migrations.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
