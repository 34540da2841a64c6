//! Batch export over a topotests tree
//!
//! [`discover_test_files`] finds `test_*.py` modules, [`BatchExporter`] runs
//! the extractor registry over each of them in order and writes one JSON
//! document per non-empty topology. Every file yields a [`FileReport`]; a
//! failing file never stops the batch.

use crate::export::{normalize, source_identifier, Shape};
use crate::extractors::{ExtractionOutcome, ExtractorRegistry, SourceFile, Strategy};
use crate::fs::FileSystem;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Directories under a topotests root that never hold test modules
pub const SKIPPED_DIRS: &[&str] = &[
    "lib",
    "munet",
    "docker",
    "__pycache__",
    ".git",
    ".pytest_cache",
];

/// File name used when writing next to the test module
pub const SIBLING_OUTPUT: &str = "exported_topology.json";

/// Sorted `test_*.py` files below `root`
pub fn discover_test_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir
                && entry.depth() > 0
                && SKIPPED_DIRS
                    .iter()
                    .any(|skip| entry.file_name() == std::ffi::OsStr::new(skip)))
        })
        .build();

    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("test_") && name.ends_with(".py") {
            files.push(entry.into_path());
        }
    }

    files.sort();
    debug!(root = %root.display(), count = files.len(), "Discovered test files");
    Ok(files)
}

/// Substring filters and a cap on the number of files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    pub patterns: Vec<String>,
    pub limit: Option<usize>,
}

impl FileSelection {
    /// Keep paths containing any pattern, then truncate to the limit
    pub fn apply(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut selected: Vec<PathBuf> = if self.patterns.is_empty() {
            files
        } else {
            files
                .into_iter()
                .filter(|path| {
                    let text = path.to_string_lossy();
                    self.patterns.iter().any(|p| text.contains(p.as_str()))
                })
                .collect()
        };
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub routers: usize,
    pub switches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl FileReport {
    fn failed(path: &Path, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Failed,
            strategy: None,
            routers: 0,
            switches: 0,
            output: None,
            error: Some(error),
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub success: Vec<FileReport>,
    pub empty: Vec<FileReport>,
    pub failed: Vec<FileReport>,
}

impl BatchSummary {
    fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            total: 0,
            success: Vec::new(),
            empty: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record(&mut self, report: FileReport) {
        self.total += 1;
        match report.status {
            FileStatus::Success => self.success.push(report),
            FileStatus::Empty => self.empty.push(report),
            FileStatus::Failed => self.failed.push(report),
        }
    }

    pub fn exported_any(&self) -> bool {
        !self.success.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        let mut text =
            serde_json::to_string_pretty(self).context("Failed to serialize batch summary")?;
        text.push('\n');
        Ok(text)
    }
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// `test_bgp_x.py` becomes `bgp_x.json`
pub fn output_file_name(path: &Path) -> String {
    let stem = source_identifier(path);
    let name = stem.strip_prefix("test_").unwrap_or(&stem);
    format!("{}.json", name)
}

pub struct BatchExporter {
    fs: Arc<dyn FileSystem>,
    registry: ExtractorRegistry,
    shape: Shape,
    output_dir: Option<PathBuf>,
    progress: Arc<dyn ProgressHandler>,
}

impl BatchExporter {
    pub fn new(fs: Arc<dyn FileSystem>, registry: ExtractorRegistry, shape: Shape) -> Self {
        Self {
            fs,
            registry,
            shape,
            output_dir: None,
            progress: Arc::new(NoOpHandler),
        }
    }

    /// Collect outputs in one directory instead of next to each test
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn output_path_for(&self, path: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.join(output_file_name(path)),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(SIBLING_OUTPUT),
        }
    }

    pub fn run(&self, root: &Path, files: &[PathBuf]) -> Result<BatchSummary> {
        let started = Instant::now();
        let total = files.len();
        self.progress.on_progress(&ProgressEvent::Started {
            root: root.display().to_string(),
            total_files: total,
        });

        if let Some(dir) = &self.output_dir {
            self.fs
                .create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }

        let mut summary = BatchSummary::new();
        for (i, path) in files.iter().enumerate() {
            let index = i + 1;
            let display = path.display().to_string();
            self.progress.on_progress(&ProgressEvent::FileStarted {
                path: display.clone(),
                index,
                total,
            });

            let file_started = Instant::now();
            let report = self.export_file(path);
            self.progress.on_progress(&ProgressEvent::FileFinished {
                path: display,
                index,
                total,
                status: report.status,
                duration: file_started.elapsed(),
            });
            summary.record(report);
        }

        self.progress.on_progress(&ProgressEvent::Completed {
            succeeded: summary.success.len(),
            empty: summary.empty.len(),
            failed: summary.failed.len(),
            total_time: started.elapsed(),
        });
        Ok(summary)
    }

    /// Extract and write one file; errors end up in the report
    pub fn export_file(&self, path: &Path) -> FileReport {
        let source = match SourceFile::load(self.fs.as_ref(), path) {
            Ok(source) => source,
            Err(err) => return FileReport::failed(path, err.to_string()),
        };
        let digest = sha256_hex(&source.text);

        let mut report = match self.registry.extract(&source) {
            ExtractionOutcome::Extracted { strategy, graph } => {
                let topology = normalize(&graph, self.shape, &source_identifier(path));
                let output = self.output_path_for(path);
                let written = topology.to_json().and_then(|text| {
                    self.fs
                        .write(&output, &text)
                        .with_context(|| format!("Failed to write {}", output.display()))
                });
                match written {
                    Ok(()) => FileReport {
                        path: path.to_path_buf(),
                        status: FileStatus::Success,
                        strategy: Some(strategy),
                        routers: graph.router_count(),
                        switches: graph.switch_count(),
                        output: Some(output),
                        error: None,
                        sha256: None,
                    },
                    Err(err) => FileReport::failed(path, format!("{:#}", err)),
                }
            }
            ExtractionOutcome::Empty { strategy } => FileReport {
                path: path.to_path_buf(),
                status: FileStatus::Empty,
                strategy: Some(strategy),
                routers: 0,
                switches: 0,
                output: None,
                error: None,
                sha256: None,
            },
            outcome @ ExtractionOutcome::Failed { .. } => {
                FileReport::failed(path, outcome.error_message().unwrap_or_default())
            }
        };
        report.sha256 = Some(digest);
        report
    }
}
