pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BatchArgs, CliArgs, Commands, ExtractArgs};
pub use output::{OutputFormat, OutputFormatter};
