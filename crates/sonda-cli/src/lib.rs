//! Crate implementing the CLI commands.

mod cli;
mod config;
mod run;

pub use self::cli::{CliAction, CliCommon, CliOpts};
pub use self::config::{AgentConfig, UploadConfig};
pub use self::run::{evaluate_command, evaluate_mappings, evaluate_normalize, evaluate_upload};
