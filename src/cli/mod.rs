//! Command-line interface for eval-forge.
//!
//! Provides the `run`, `generate`, `infer`, `evaluate` and `analyze`
//! commands plus YAML configuration loading.

pub mod config;

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
