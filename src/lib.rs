//! topoextract - recover network topologies from topotest builder routines
//!
//! Topotest modules build their network with an imperative API
//! (`tgen.add_router("r1")`, `switch.add_link(tgen.gears["r1"])`, ...) that
//! normally needs root, network namespaces and running daemons. This crate
//! recovers the resulting router/switch graph without any of that.
//!
//! # Core Concepts
//!
//! - **Strategies**: three independent extractors tried in order. The
//!   dynamic one interprets the module against a simulated framework; the
//!   syntax one walks a tree-sitter parse; the text one uses regexes.
//! - **Execution environment**: every side effect a builder can trigger
//!   (commands, privilege checks, logging) goes through a capability trait,
//!   so the simulated runtime is created per extraction and dropped after.
//! - **Export**: a deterministic rich or simple projection of the graph.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use topoextract::export::{normalize, Shape};
//! use topoextract::extractors::ExtractorRegistry;
//! use topoextract::fs::{FileSystem, RealFileSystem};
//! use topoextract::runtime::RuntimeSettings;
//!
//! let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
//! let registry = ExtractorRegistry::with_defaults(fs.clone(), RuntimeSettings::default());
//! let (_, outcome) = registry
//!     .extract_path(fs.as_ref(), Path::new("bgp_basic/test_bgp_basic.py"))
//!     .unwrap();
//! if let Some(graph) = outcome.graph() {
//!     print!("{}", normalize(graph, Shape::Rich, "test_bgp_basic").to_json().unwrap());
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`graph`]: routers, switches and links
//! - [`extractors`]: the strategies and their registry
//! - [`runtime`]: execution environment capabilities and the simulated runtime
//! - [`export`]: canonical rich/simple shapes
//! - [`batch`]: tree discovery and per-file export
//! - [`cli`]: command-line interface

pub mod batch;
pub mod cli;
pub mod config;
pub mod export;
pub mod extractors;
pub mod fs;
pub mod graph;
pub mod progress;
pub mod runtime;
pub mod util;

pub use config::{ConfigError, TopoExtractConfig};
pub use export::{normalize, CanonicalTopology, Shape};
pub use extractors::{ExtractionError, ExtractionOutcome, ExtractorRegistry, Strategy};
pub use graph::{Graph, GraphError, NodeKind};
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_topoextract() {
        assert_eq!(NAME, "topoextract");
    }
}
