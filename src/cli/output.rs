//! Output formatting for multiple formats
//!
//! Topologies render as JSON or YAML through [`crate::export`], or as a
//! short human-readable summary. Batch summaries get the same treatment.
//!
//! # Example
//!
//! ```ignore
//! use topoextract::cli::output::{OutputFormat, OutputFormatter};
//! use topoextract::export::Shape;
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! let output = formatter.format(&graph, Shape::Rich, "test_bgp")?;
//! print!("{}", output);
//! ```

use anyhow::{Context, Result};

use crate::batch::{BatchSummary, FileReport};
use crate::export::{normalize, rich, NodeEntry, Shape};
use crate::graph::Graph;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Failed files listed in the human batch summary
const MAX_LISTED_FAILURES: usize = 10;

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an extracted graph; `shape` is ignored by the human format
    pub fn format(&self, graph: &Graph, shape: Shape, source_id: &str) -> Result<String> {
        match self.format {
            OutputFormat::Json => normalize(graph, shape, source_id).to_json(),
            OutputFormat::Yaml => normalize(graph, shape, source_id).to_yaml(),
            OutputFormat::Human => Ok(self.format_human(graph, source_id)),
        }
    }

    pub fn format_summary(&self, summary: &BatchSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => summary.to_json(),
            OutputFormat::Yaml => {
                serde_yaml::to_string(summary).context("Failed to serialize batch summary to YAML")
            }
            OutputFormat::Human => Ok(self.format_summary_human(summary)),
        }
    }

    fn format_human(&self, graph: &Graph, source_id: &str) -> String {
        let topology = rich(graph, source_id);
        let mut output = String::new();

        output.push_str(&format!("\u{2713} Topology: {}\n", source_id));
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!(
            "Routers:  {}\nSwitches: {}\n",
            topology.metadata.total_routers, topology.metadata.total_switches
        ));

        for (title, nodes) in [("Routers", &topology.routers), ("Switches", &topology.switches)] {
            if nodes.is_empty() {
                continue;
            }
            output.push_str(&format!("\n{}:\n", title));
            let last = nodes.len() - 1;
            for (i, (name, entry)) in nodes.iter().enumerate() {
                let connector = if i == last { "\u{2514}" } else { "\u{251C}" };
                output.push_str(&format!(
                    "{}\u{2500} {} {}\n",
                    connector,
                    name,
                    peer_list(entry)
                ));
            }
        }

        output
    }

    fn format_summary_human(&self, summary: &BatchSummary) -> String {
        let mut output = String::new();

        output.push_str("Batch Export Summary\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("  Total:      {:4}\n", summary.total));
        output.push_str(&format!("  Successful: {:4}\n", summary.success.len()));
        output.push_str(&format!("  Empty:      {:4}\n", summary.empty.len()));
        output.push_str(&format!("  Failed:     {:4}\n", summary.failed.len()));

        if !summary.failed.is_empty() {
            output.push_str("\nFailed:\n");
            for report in summary.failed.iter().take(MAX_LISTED_FAILURES) {
                output.push_str(&format!("  - {}\n", failure_line(report)));
            }
            if summary.failed.len() > MAX_LISTED_FAILURES {
                output.push_str(&format!(
                    "  ... and {} more\n",
                    summary.failed.len() - MAX_LISTED_FAILURES
                ));
            }
        }

        if summary.exported_any() {
            output.push_str(&format!(
                "\n\u{2713} Exported {} topologies\n",
                summary.success.len()
            ));
        } else {
            output.push_str("\n\u{2717} No topology exported\n");
        }

        output
    }
}

fn peer_list(entry: &NodeEntry) -> String {
    if entry.links.is_empty() {
        "(no links)".to_string()
    } else {
        format!(
            "\u{2192} {}",
            entry.links.keys().cloned().collect::<Vec<_>>().join(", ")
        )
    }
}

fn failure_line(report: &FileReport) -> String {
    match &report.error {
        Some(error) => format!("{}: {}", report.path.display(), error),
        None => report.path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FileStatus;
    use crate::graph::NodeKind;
    use chrono::Utc;
    use std::path::PathBuf;

    fn star() -> Graph {
        let mut graph = Graph::new();
        graph.add_node("r1", NodeKind::Router).unwrap();
        graph.add_node("r2", NodeKind::Router).unwrap();
        graph.add_node("s1", NodeKind::Switch).unwrap();
        graph.connect("s1", "r1").unwrap();
        graph.connect("s1", "r2").unwrap();
        graph
    }

    fn report(path: &str, status: FileStatus, error: Option<&str>) -> FileReport {
        FileReport {
            path: PathBuf::from(path),
            status,
            strategy: None,
            routers: 0,
            switches: 0,
            output: None,
            error: error.map(str::to_string),
            sha256: None,
        }
    }

    #[test]
    fn test_json_format() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format(&star(), Shape::Simple, "test_star").unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, serde_json::json!({"r1": ["s1"], "r2": ["s1"]}));
    }

    #[test]
    fn test_yaml_format() {
        let formatter = OutputFormatter::new(OutputFormat::Yaml);
        let output = formatter.format(&star(), Shape::Rich, "test_star").unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        assert_eq!(parsed["metadata"]["exported_from"], "test_star");
        assert_eq!(parsed["switches"]["s1"]["type"], "switch");
    }

    #[test]
    fn test_human_format() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        let output = formatter.format(&star(), Shape::Rich, "test_star").unwrap();

        assert!(output.contains("Topology: test_star"));
        assert!(output.contains("Routers:  2"));
        assert!(output.contains("Switches: 1"));
        assert!(output.contains("s1 \u{2192} r1, r2"));
    }

    #[test]
    fn test_human_format_isolated_node() {
        let mut graph = Graph::new();
        graph.add_node("r9", NodeKind::Router).unwrap();
        let output = OutputFormatter::new(OutputFormat::Human)
            .format(&graph, Shape::Rich, "t")
            .unwrap();
        assert!(output.contains("r9 (no links)"));
        assert!(!output.contains("Switches:\n"));
    }

    #[test]
    fn test_summary_human() {
        let mut failed = Vec::new();
        for i in 0..12 {
            failed.push(report(
                &format!("/t/test_{}.py", i),
                FileStatus::Failed,
                Some("text: no builder function found"),
            ));
        }
        let summary = BatchSummary {
            generated_at: Utc::now(),
            total: 13,
            success: vec![report("/t/test_ok.py", FileStatus::Success, None)],
            empty: Vec::new(),
            failed,
        };

        let output = OutputFormatter::new(OutputFormat::Human)
            .format_summary(&summary)
            .unwrap();
        assert!(output.contains("Successful:    1"));
        assert!(output.contains("Failed:       12"));
        assert!(output.contains("/t/test_0.py: text: no builder function found"));
        assert!(output.contains("... and 2 more"));
        assert!(output.contains("Exported 1 topologies"));
    }

    #[test]
    fn test_summary_json() {
        let summary = BatchSummary {
            generated_at: Utc::now(),
            total: 1,
            success: Vec::new(),
            empty: vec![report("/t/test_e.py", FileStatus::Empty, None)],
            failed: Vec::new(),
        };
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_summary(&summary)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["empty"][0]["status"], "empty");
    }
}
