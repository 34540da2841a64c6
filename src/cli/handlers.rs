//! Subcommand handlers; each returns the process exit code

use super::commands::{BatchArgs, ExtractArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::batch::{discover_test_files, BatchExporter, FileSelection};
use crate::config::TopoExtractConfig;
use crate::export::{source_identifier, Shape};
use crate::extractors::{ExtractionOutcome, ExtractorRegistry, Strategy};
use crate::fs::{FileSystem, RealFileSystem};
use crate::progress::{LoggingHandler, ProgressBarHandler, ProgressHandler};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_EMPTY: i32 = 2;

/// Strategy list and shape after applying flags over the configuration
struct Resolved {
    strategies: Vec<Strategy>,
    shape: Shape,
}

fn resolve(
    config: &TopoExtractConfig,
    strategy: Option<&str>,
    shape: Option<Shape>,
) -> Result<Resolved> {
    let strategies = match strategy {
        Some(list) => Strategy::parse_list(list)
            .map_err(|reason| anyhow::anyhow!("Invalid --strategy '{}': {}", list, reason))?,
        None => config.strategy_list()?,
    };
    let shape = match shape {
        Some(shape) => shape,
        None => config.export_shape()?,
    };
    Ok(Resolved { strategies, shape })
}

pub fn handle_extract(args: &ExtractArgs) -> i32 {
    match run_extract(args, &TopoExtractConfig::default()) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    }
}

pub fn run_extract(args: &ExtractArgs, config: &TopoExtractConfig) -> Result<i32> {
    let resolved = resolve(config, args.strategy.as_deref(), args.shape.map(Into::into))?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let registry =
        ExtractorRegistry::for_strategies(&resolved.strategies, fs.clone(), config.runtime_settings());

    let (_, outcome) = registry
        .extract_path(fs.as_ref(), &args.file)
        .with_context(|| format!("Cannot extract {}", args.file.display()))?;

    match outcome {
        ExtractionOutcome::Extracted { strategy, graph } => {
            info!(strategy = %strategy, "Extraction succeeded");
            let formatter = OutputFormatter::new(args.format.into());
            let text = formatter.format(&graph, resolved.shape, &source_identifier(&args.file))?;
            emit(&text, args.output.as_deref(), fs.as_ref())?;
            Ok(EXIT_SUCCESS)
        }
        ExtractionOutcome::Empty { strategy } => {
            warn!(strategy = %strategy, "Builder produced no nodes");
            eprintln!("No nodes found in {}", args.file.display());
            Ok(EXIT_EMPTY)
        }
        outcome @ ExtractionOutcome::Failed { .. } => {
            let message = outcome.error_message().unwrap_or_default();
            error!(file = %args.file.display(), error = %message, "Extraction failed");
            eprintln!("Extraction failed: {}", message);
            Ok(EXIT_FAILURE)
        }
    }
}

fn emit(text: &str, output: Option<&Path>, fs: &dyn FileSystem) -> Result<()> {
    match output {
        Some(path) => {
            fs.write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Topology written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

pub fn handle_batch(args: &BatchArgs, quiet: bool, verbose: bool) -> i32 {
    let progress: Arc<dyn ProgressHandler> = if !quiet && !verbose && atty::is(atty::Stream::Stderr)
    {
        Arc::new(ProgressBarHandler::new())
    } else {
        Arc::new(LoggingHandler)
    };

    match run_batch(args, &TopoExtractConfig::default(), progress) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    }
}

pub fn run_batch(
    args: &BatchArgs,
    config: &TopoExtractConfig,
    progress: Arc<dyn ProgressHandler>,
) -> Result<i32> {
    let resolved = resolve(config, args.strategy.as_deref(), args.shape.map(Into::into))?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let registry =
        ExtractorRegistry::for_strategies(&resolved.strategies, fs.clone(), config.runtime_settings());

    let selection = FileSelection {
        patterns: args.filter.clone(),
        limit: args.limit,
    };
    let files = selection.apply(discover_test_files(&args.root)?);

    let mut exporter =
        BatchExporter::new(fs.clone(), registry, resolved.shape).with_progress(progress);
    if let Some(dir) = &args.output_dir {
        exporter = exporter.with_output_dir(dir);
    }
    let summary = exporter.run(&args.root, &files)?;

    if let Some(path) = &args.summary {
        fs.write(path, &summary.to_json()?)
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
        info!(path = %path.display(), "Summary written");
    }

    let report = OutputFormatter::new(OutputFormat::Human).format_summary(&summary)?;
    eprint!("{}", report);

    Ok(if summary.exported_any() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::OutputFormatArg;
    use crate::progress::NoOpHandler;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const BUILDER: &str = "\
def build_topo(tgen):
    tgen.add_router('r1')
    tgen.add_router('r2')
    switch = tgen.add_switch('s1')
    switch.add_link(tgen.gears['r1'])
    switch.add_link(tgen.gears['r2'])
";

    fn config() -> TopoExtractConfig {
        TopoExtractConfig {
            strategies: "syntax,text".to_string(),
            shape: "simple".to_string(),
            rundir: std::env::temp_dir().join("topoextract-handler-tests"),
            log_level: "info".to_string(),
        }
    }

    fn extract_args(file: PathBuf, output: Option<PathBuf>) -> ExtractArgs {
        ExtractArgs {
            file,
            strategy: None,
            shape: None,
            format: OutputFormatArg::Json,
            output,
        }
    }

    #[test]
    fn test_extract_writes_output_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("test_pair.py");
        fs::write(&source, BUILDER).unwrap();
        let out = dir.path().join("pair.json");

        let code = run_extract(&extract_args(source, Some(out.clone())), &config()).unwrap();
        assert_eq!(code, EXIT_SUCCESS);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"r1": ["s1"], "r2": ["s1"]}));
    }

    #[test]
    fn test_extract_empty_exit_code() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("test_empty.py");
        fs::write(&source, "def build_topo(tgen):\n    pass\n").unwrap();

        let code = run_extract(&extract_args(source, None), &config()).unwrap();
        assert_eq!(code, EXIT_EMPTY);
    }

    #[test]
    fn test_extract_failure_exit_code() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("test_nothing.py");
        fs::write(&source, "x = 1\n").unwrap();

        let code = run_extract(&extract_args(source, None), &config()).unwrap();
        assert_eq!(code, EXIT_FAILURE);
    }

    #[test]
    fn test_extract_rejects_bad_strategy_flag() {
        let mut args = extract_args(PathBuf::from("test_x.py"), None);
        args.strategy = Some("text,text".to_string());
        assert!(run_extract(&args, &config()).is_err());
    }

    #[test]
    fn test_batch_exit_codes_and_summary() {
        let dir = TempDir::new().unwrap();
        let pair = dir.path().join("pair");
        fs::create_dir_all(&pair).unwrap();
        fs::write(pair.join("test_pair.py"), BUILDER).unwrap();
        let out = dir.path().join("out");
        let summary_path = dir.path().join("summary.json");

        let args = BatchArgs {
            root: dir.path().to_path_buf(),
            strategy: None,
            shape: None,
            output_dir: Some(out.clone()),
            filter: Vec::new(),
            limit: None,
            summary: Some(summary_path.clone()),
        };
        let code = run_batch(&args, &config(), Arc::new(NoOpHandler)).unwrap();
        assert_eq!(code, EXIT_SUCCESS);
        assert!(out.join("pair.json").exists());
        assert!(summary_path.exists());

        let filtered = BatchArgs {
            filter: vec!["ospf".to_string()],
            summary: None,
            ..args
        };
        let code = run_batch(&filtered, &config(), Arc::new(NoOpHandler)).unwrap();
        assert_eq!(code, EXIT_FAILURE);
    }
}
