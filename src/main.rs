use topoextract::cli::commands::{CliArgs, Commands};
use topoextract::cli::handlers::{handle_batch, handle_extract};
use topoextract::util::{init_logging, level_from_flags, LoggingConfig};
use topoextract::VERSION;

use clap::Parser;
use tracing::debug;

fn main() {
    let args = CliArgs::parse();
    let base = if args.verbose {
        LoggingConfig::development()
    } else {
        LoggingConfig::from_env()
    };
    init_logging(LoggingConfig {
        level: level_from_flags(args.log_level.as_deref(), args.verbose, args.quiet),
        ..base
    });

    debug!("topoextract v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Extract(extract_args) => handle_extract(extract_args),
        Commands::Batch(batch_args) => handle_batch(batch_args, args.quiet, args.verbose),
    };

    std::process::exit(exit_code);
}
