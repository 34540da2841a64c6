//! Side-effect free stand-in for the builder framework's host dependencies

use super::environment::{CommandStatus, ExecutionEnvironment, LimitScope, RuntimeSettings};
use crate::fs::FileSystem;
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Simulated host used for exactly one extraction
///
/// Commands succeed without running, except `mkdir -p`, which is honored
/// through the file system because builder code writes into the directories
/// it asked for. Privilege checks pass, limit changes are dropped, kernel
/// modules are always present and logger output is discarded.
pub struct SimulatedRuntime {
    fs: Arc<dyn FileSystem>,
    settings: RuntimeSettings,
    commands: RefCell<Vec<String>>,
}

impl SimulatedRuntime {
    pub fn new(fs: Arc<dyn FileSystem>, settings: RuntimeSettings) -> Self {
        Self {
            fs,
            settings,
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Every command line seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    fn honor_directory_creation(&self, command: &str) {
        for path in mkdir_targets(command) {
            self.make_dirs(&path);
        }
    }
}

/// Target paths of every `mkdir -p` in a compound command line
pub fn mkdir_targets(command: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for part in command.split("&&").flat_map(|p| p.split(';')) {
        let mut words = part.split_whitespace();
        if words.next() != Some("mkdir") {
            continue;
        }
        let mut parents = false;
        let mut paths = Vec::new();
        let mut skip_mode = false;
        for word in words {
            if skip_mode {
                skip_mode = false;
            } else if word == "--parents" {
                parents = true;
            } else if let Some(flags) = word.strip_prefix('-').filter(|f| !f.starts_with('-')) {
                parents |= flags.contains('p');
                skip_mode = flags.ends_with('m');
            } else if !word.starts_with("--") {
                let path = word.trim_matches(|c| c == '"' || c == '\'');
                if !path.is_empty() {
                    paths.push(path.to_string());
                }
            }
        }
        if parents {
            targets.extend(paths);
        }
    }
    targets
}

impl ExecutionEnvironment for SimulatedRuntime {
    fn run_command(&self, command: &str) -> CommandStatus {
        debug!(command, "Simulating command");
        self.commands.borrow_mut().push(command.to_string());
        self.honor_directory_creation(command);
        CommandStatus::success()
    }

    fn adjust_limits(&self, scope: LimitScope) {
        trace!(?scope, "Ignoring limit adjustment");
    }

    fn has_privileges(&self) -> bool {
        true
    }

    fn module_present(&self, module: &str) -> bool {
        trace!(module, "Reporting kernel module as present");
        true
    }

    fn make_dirs(&self, path: &str) -> bool {
        match self.fs.create_dir_all(Path::new(path)) {
            Ok(()) => true,
            Err(e) => {
                warn!(path, error = %e, "Could not create directory requested by builder");
                false
            }
        }
    }

    fn log(&self, logger: &str, level: &str, message: &str) {
        trace!(target: "topoextract::sink", logger, severity = level, "{}", message);
    }

    fn option(&self, name: &str) -> Option<String> {
        match name.trim_start_matches('-') {
            "capture" => Some(self.settings.capture.clone()),
            "rundir" => Some(self.settings.rundir.to_string_lossy().to_string()),
            _ => None,
        }
    }

    fn read_file(&self, path: &str) -> Option<String> {
        match self.fs.read_to_string(Path::new(path)) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path, error = %e, "Builder asked for an unreadable file");
                None
            }
        }
    }

    fn path_exists(&self, path: &str) -> bool {
        self.fs.exists(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn runtime() -> (Arc<MockFileSystem>, SimulatedRuntime) {
        let fs = Arc::new(MockFileSystem::new());
        let rt = SimulatedRuntime::new(
            fs.clone(),
            RuntimeSettings::with_rundir("/tmp/topotests_export_logs"),
        );
        (fs, rt)
    }

    #[test]
    fn test_commands_succeed_and_are_recorded() {
        let (_, rt) = runtime();
        let status = rt.run_command("ip netns add r1");

        assert!(status.is_success());
        assert_eq!(rt.commands(), vec!["ip netns add r1".to_string()]);
    }

    #[test]
    fn test_mkdir_p_is_honored() {
        let (fs, rt) = runtime();
        rt.run_command("mkdir -p /tmp/topotests/bgp_basic && chmod 1777 /tmp/topotests/bgp_basic");

        assert!(fs.is_dir(Path::new("/tmp/topotests/bgp_basic")));
    }

    #[test]
    fn test_plain_mkdir_is_not_honored() {
        let (fs, rt) = runtime();
        rt.run_command("mkdir /tmp/plain");

        assert!(!fs.exists(Path::new("/tmp/plain")));
    }

    #[test]
    fn test_mkdir_targets() {
        assert_eq!(
            mkdir_targets("mkdir -p /a '/b' ; mkdir -pv /c && rm -rf /d"),
            vec!["/a", "/b", "/c"]
        );
        assert_eq!(mkdir_targets("mkdir -m 755 -p /logs"), vec!["/logs"]);
        assert!(mkdir_targets("echo mkdir -p /x").is_empty());
    }

    #[test]
    fn test_options() {
        let (_, rt) = runtime();

        assert_eq!(rt.option("capture"), Some("no".to_string()));
        assert_eq!(rt.option("--rundir"), Some("/tmp/topotests_export_logs".to_string()));
        assert_eq!(rt.option("topology_only"), None);
    }

    #[test]
    fn test_reads_go_through_the_file_system() {
        let (fs, rt) = runtime();
        fs.add_file("ospf/ospf_topo.json", "{}");

        assert_eq!(rt.read_file("/mock/ospf/ospf_topo.json"), Some("{}".to_string()));
        assert!(rt.path_exists("/mock/ospf"));
        assert_eq!(rt.read_file("/mock/missing.json"), None);
    }

    #[test]
    fn test_host_checks_are_permissive() {
        let (_, rt) = runtime();
        rt.adjust_limits(LimitScope::Host);

        assert!(rt.has_privileges());
        assert!(rt.module_present("mpls_router"));
    }
}
