// Topology extraction from builder source files
//
// Three strategies recover a graph from a topotest module: executing the
// builder routine against a simulated runtime, matching builder idioms in
// the syntax tree, and matching them in the raw text. The registry tries
// them in order and reports the first non-empty graph.

pub mod dynamic;
pub mod registry;
pub mod syntax;
pub mod text;

pub use dynamic::DynamicExtractor;
pub use registry::{Attempt, ExtractionOutcome, ExtractorRegistry};
pub use syntax::SyntaxExtractor;
pub use text::TextExtractor;

use crate::fs::FileSystem;
use crate::graph::{Graph, GraphError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Failure classes reported per file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// No builder-shaped entry point
    Discovery,
    /// The file could not be read, parsed or executed as a module
    Load,
    /// The entry point ran but raised before a graph existed
    Construction,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("failed to read {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("source could not be parsed")]
    Unparseable,

    #[error("no builder function found")]
    NoBuilderFunction,

    #[error("no recognized entry point")]
    NoEntryPoint,

    #[error("module execution failed: {0}")]
    ModuleLoad(String),

    #[error("construction failed: {0}")]
    Construction(String),
}

impl ExtractionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractionError::NoBuilderFunction | ExtractionError::NoEntryPoint => {
                FailureKind::Discovery
            }
            ExtractionError::Unreadable { .. }
            | ExtractionError::Unparseable
            | ExtractionError::ModuleLoad(_) => FailureKind::Load,
            ExtractionError::Construction(_) => FailureKind::Construction,
        }
    }
}

/// A graph that rejects what an extractor recognized is a construction failure
impl From<GraphError> for ExtractionError {
    fn from(err: GraphError) -> Self {
        ExtractionError::Construction(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Dynamic,
    Syntax,
    Text,
}

impl Strategy {
    pub const DEFAULT_ORDER: [Strategy; 3] = [Strategy::Dynamic, Strategy::Syntax, Strategy::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Dynamic => "dynamic",
            Strategy::Syntax => "syntax",
            Strategy::Text => "text",
        }
    }

    /// Parse a comma separated strategy list such as `dynamic,text`
    pub fn parse_list(s: &str) -> Result<Vec<Strategy>, String> {
        let mut strategies = Vec::new();
        for part in s.split(',').map(str::trim) {
            let strategy: Strategy = part.parse()?;
            if strategies.contains(&strategy) {
                return Err(format!("strategy '{}' listed twice", part));
            }
            strategies.push(strategy);
        }
        Ok(strategies)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dynamic" => Ok(Strategy::Dynamic),
            "syntax" | "ast" => Ok(Strategy::Syntax),
            "text" | "regex" => Ok(Strategy::Text),
            "" => Err("empty strategy name".to_string()),
            other => Err(format!(
                "unknown strategy '{}' (expected dynamic, syntax or text)",
                other
            )),
        }
    }
}

/// A builder source file loaded into memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, ExtractionError> {
        let text = fs
            .read_to_string(path)
            .map_err(|e| ExtractionError::Unreadable {
                path: path.display().to_string(),
                message: format!("{:#}", e),
            })?;
        Ok(Self::new(path, text))
    }

    /// Module name the file is loaded under, its file stem
    pub fn module_name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("topology")
            .to_string()
    }
}

/// One way of recovering a graph from a source file
pub trait TopologyExtractor {
    fn strategy(&self) -> Strategy;

    fn extract(&self, source: &SourceFile) -> Result<Graph, ExtractionError>;
}

/// Whether a function name looks like a topology builder
pub(crate) fn is_builder_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("build") && lower.contains("topo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    #[test]
    fn test_strategy_parse_list() {
        assert_eq!(
            Strategy::parse_list("dynamic, text").unwrap(),
            vec![Strategy::Dynamic, Strategy::Text]
        );
        assert!(Strategy::parse_list("text,text").is_err());
        assert!(Strategy::parse_list("").is_err());
        assert!(Strategy::parse_list("llm").is_err());
    }

    #[test]
    fn test_strategy_display_roundtrip() {
        for strategy in Strategy::DEFAULT_ORDER {
            assert_eq!(strategy.to_string().parse::<Strategy>(), Ok(strategy));
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ExtractionError::NoEntryPoint.kind(), FailureKind::Discovery);
        assert_eq!(
            ExtractionError::ModuleLoad("boom".into()).kind(),
            FailureKind::Load
        );
        assert_eq!(
            ExtractionError::Construction("boom".into()).kind(),
            FailureKind::Construction
        );
        assert_eq!(
            ExtractionError::ModuleLoad("NameError: x".into()).to_string(),
            "module execution failed: NameError: x"
        );
        let err = ExtractionError::from(GraphError::DuplicateNode("r1".into()));
        assert_eq!(err.kind(), FailureKind::Construction);
        assert_eq!(err.to_string(), "construction failed: node 'r1' already exists");
    }

    #[test]
    fn test_source_file_load_and_module_name() {
        let fs = MockFileSystem::new();
        fs.add_file("bgp/test_bgp_basic.py", "import os\n");

        let source = SourceFile::load(&fs, Path::new("/mock/bgp/test_bgp_basic.py")).unwrap();
        assert_eq!(source.module_name(), "test_bgp_basic");
        assert_eq!(source.text, "import os\n");

        let missing = SourceFile::load(&fs, Path::new("/mock/none.py")).unwrap_err();
        assert_eq!(missing.kind(), FailureKind::Load);
    }

    #[test]
    fn test_is_builder_name() {
        assert!(is_builder_name("build_topo"));
        assert!(is_builder_name("BuildTopology"));
        assert!(is_builder_name("build_topo_vrf"));
        assert!(!is_builder_name("setup_module"));
        assert!(is_builder_name("topology_builder"));
    }
}
