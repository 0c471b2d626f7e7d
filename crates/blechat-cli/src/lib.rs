//! blechat CLI library
//!
//! Thin lifecycle wiring around the `blechat-core` sessions: argument parsing,
//! configuration loading and the command handlers.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod demo;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
