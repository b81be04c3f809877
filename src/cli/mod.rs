//! Command-line interface for thugd.
//!
//! Provides the `boss` and `thuglet` subcommands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, BossArgs, Cli, Commands, ThugletArgs};
