//! FileSystem trait definition

use anyhow::Result;
use std::path::Path;

/// Abstraction over file system operations for testability
///
/// Extractors read sources through it, the simulated runtime honors
/// directory creation through it and batch export writes documents
/// through it, so tests can run entirely against [`super::MockFileSystem`].
pub trait FileSystem: Send + Sync {
    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Check if path is a file
    fn is_file(&self, path: &Path) -> bool;

    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Create a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Write a whole file, replacing existing content; missing parents are created
    fn write(&self, path: &Path, contents: &str) -> Result<()>;
}
