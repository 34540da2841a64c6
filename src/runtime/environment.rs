//! Capability set a builder routine may reach while it runs

use std::env;
use std::path::PathBuf;

/// Exit status and captured output of a command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandStatus {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandStatus {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Which resource limits a builder asks to raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Host,
    Namespace,
}

/// Settings handed to the simulated runtime for one extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Scratch directory reported as the `rundir` option
    pub rundir: PathBuf,
    /// Value reported as the `capture` option
    pub capture: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            rundir: env::temp_dir().join("topotests_export_logs"),
            capture: "no".to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn with_rundir(rundir: impl Into<PathBuf>) -> Self {
        Self {
            rundir: rundir.into(),
            ..Self::default()
        }
    }
}

/// External effects a builder routine can trigger
///
/// The dynamic extractor never touches the host directly; every process
/// launch, privilege query, logger call and configuration lookup made by
/// interpreted code is routed through this trait.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionEnvironment {
    /// Run a shell command line
    fn run_command(&self, command: &str) -> CommandStatus;

    /// Raise process or namespace resource limits
    fn adjust_limits(&self, scope: LimitScope);

    /// Whether the process may perform privileged operations
    fn has_privileges(&self) -> bool;

    /// Whether a kernel module is loaded
    fn module_present(&self, module: &str) -> bool;

    /// Create a directory and its parents
    fn make_dirs(&self, path: &str) -> bool;

    /// Deliver one record to the named logger
    fn log(&self, logger: &str, level: &str, message: &str);

    /// Execution option lookup (`capture`, `rundir`, ...)
    fn option(&self, name: &str) -> Option<String>;

    /// Read a data file the routine refers to, such as a JSON topology
    fn read_file(&self, path: &str) -> Option<String>;

    fn path_exists(&self, path: &str) -> bool;
}
