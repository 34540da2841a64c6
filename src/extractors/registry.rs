//! Extractor registry - ordered strategy fallback

use super::{
    DynamicExtractor, ExtractionError, SourceFile, Strategy, SyntaxExtractor, TextExtractor,
    TopologyExtractor,
};
use crate::fs::FileSystem;
use crate::graph::Graph;
use crate::runtime::RuntimeSettings;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A strategy that missed, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub strategy: Strategy,
    pub error: ExtractionError,
}

/// Result of running the strategy list over one file
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// A strategy produced a graph with at least one node
    Extracted { strategy: Strategy, graph: Graph },
    /// No strategy found nodes, but `strategy` ran to completion
    Empty { strategy: Strategy },
    /// Every strategy failed
    Failed { attempts: Vec<Attempt> },
}

impl ExtractionOutcome {
    pub fn graph(&self) -> Option<&Graph> {
        match self {
            ExtractionOutcome::Extracted { graph, .. } => Some(graph),
            _ => None,
        }
    }

    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            ExtractionOutcome::Extracted { strategy, .. } | ExtractionOutcome::Empty { strategy } => {
                Some(*strategy)
            }
            ExtractionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, ExtractionOutcome::Extracted { .. })
    }

    /// `strategy: error` for every failed attempt, joined with `; `
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExtractionOutcome::Failed { attempts } => Some(
                attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.strategy, a.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        }
    }
}

/// Ordered list of extraction strategies
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TopologyExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Dynamic, then syntax tree, then text
    pub fn with_defaults(fs: Arc<dyn FileSystem>, settings: RuntimeSettings) -> Self {
        Self::for_strategies(&Strategy::DEFAULT_ORDER, fs, settings)
    }

    pub fn for_strategies(
        strategies: &[Strategy],
        fs: Arc<dyn FileSystem>,
        settings: RuntimeSettings,
    ) -> Self {
        let mut registry = Self::new();
        for strategy in strategies {
            match strategy {
                Strategy::Dynamic => registry.register(Box::new(DynamicExtractor::new(
                    fs.clone(),
                    settings.clone(),
                ))),
                Strategy::Syntax => registry.register(Box::new(SyntaxExtractor::new())),
                Strategy::Text => registry.register(Box::new(TextExtractor::new())),
            }
        }
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn TopologyExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        self.extractors.iter().map(|e| e.strategy()).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Try each strategy in order; the first non-empty graph wins
    pub fn extract(&self, source: &SourceFile) -> ExtractionOutcome {
        let mut attempts = Vec::new();
        let mut empty = None;

        for extractor in &self.extractors {
            let strategy = extractor.strategy();
            match extractor.extract(source) {
                Ok(graph) if !graph.is_empty() => {
                    info!(
                        path = %source.path.display(),
                        strategy = %strategy,
                        routers = graph.router_count(),
                        switches = graph.switch_count(),
                        "Topology extracted"
                    );
                    return ExtractionOutcome::Extracted { strategy, graph };
                }
                Ok(_) => {
                    debug!(strategy = %strategy, "Strategy found no nodes");
                    empty.get_or_insert(strategy);
                }
                Err(error) => {
                    debug!(strategy = %strategy, error = %error, "Strategy failed");
                    attempts.push(Attempt { strategy, error });
                }
            }
        }

        match empty {
            Some(strategy) => ExtractionOutcome::Empty { strategy },
            None => ExtractionOutcome::Failed { attempts },
        }
    }

    /// Load a file and extract from it
    pub fn extract_path(
        &self,
        fs: &dyn FileSystem,
        path: &Path,
    ) -> Result<(SourceFile, ExtractionOutcome), ExtractionError> {
        let source = SourceFile::load(fs, path)?;
        let outcome = self.extract(&source);
        Ok((source, outcome))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
