//! CLI argument parsing

mod commands;

pub use commands::{Cli, Commands, TokenCommands};
