//! Dynamic extractor - runs the builder routine against a simulated framework
//!
//! The source file is parsed into a small Python subset and executed by a
//! tree-walking interpreter. Framework imports resolve to simulated modules
//! whose effects go through an [`ExecutionEnvironment`], and every finished
//! `Topogen` is reported to a [`CaptureObserver`]. Entry points are tried
//! in order:
//!
//! 1. `build_topo`, passed to `Topogen` the way test modules do it
//! 2. any other module-level function whose name mentions build and topo
//! 3. `setup_module`, stopped as soon as its topology is built
//! 4. a `tgen` style fixture, advanced to its first `yield`

mod ast;
mod builtins;
mod format;
mod framework;
mod interpreter;
mod lower;
mod value;

pub use framework::{json_plan, JsonPlan, PlannedLink};

use self::interpreter::{Exec, Interpreter, Unwind};
use self::value::{ModuleObj, Value};
use super::{is_builder_name, ExtractionError, SourceFile, Strategy, TopologyExtractor};
use crate::fs::FileSystem;
use crate::graph::Graph;
use crate::runtime::{
    CaptureObserver, CapturePolicy, ConstructionObserver, ExecutionEnvironment, RuntimeSettings,
    SimulatedRuntime,
};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Stack of the interpreter thread; deep builder recursion is bounded by the call depth limit
const INTERPRETER_STACK_SIZE: usize = 64 * 1024 * 1024;

const BUILD_FUNCTION: &str = "build_topo";
const SETUP_FUNCTION: &str = "setup_module";

pub struct DynamicExtractor {
    fs: Arc<dyn FileSystem>,
    settings: RuntimeSettings,
}

impl DynamicExtractor {
    pub fn new(fs: Arc<dyn FileSystem>, settings: RuntimeSettings) -> Self {
        Self { fs, settings }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Extract on the current thread against a caller-supplied environment
    pub fn extract_with(
        &self,
        source: &SourceFile,
        env: Rc<dyn ExecutionEnvironment>,
    ) -> Result<Graph, ExtractionError> {
        let module = lower::parse_module(&source.text)
            .map_err(|failure| ExtractionError::ModuleLoad(failure.to_string()))?;

        let observer = Rc::new(RefCell::new(CaptureObserver::new(CapturePolicy::Observe)));
        let shared: Rc<RefCell<dyn ConstructionObserver>> = observer.clone();
        let mut interp = Interpreter::new(env, shared, &source.path);
        let name = source.module_name();

        let executed = guarded(|| interp.exec_module(&name, &module))
            .map_err(|panic| ExtractionError::ModuleLoad(format!("interpreter panicked: {}", panic)))?;
        let loaded = match executed {
            Ok(loaded) => loaded,
            Err(Unwind::Raise(exc)) => {
                return Err(ExtractionError::ModuleLoad(interp.describe(&exc)));
            }
            Err(_) => interp
                .module(&name)
                .ok_or_else(|| ExtractionError::ModuleLoad("module did not load".to_string()))?,
        };

        let mut session = Session {
            interp,
            observer,
            module: loaded,
            modname: name,
            empty_seen: false,
            construction_error: None,
        };
        session.run().inspect(|graph| {
            info!(
                path = %source.path.display(),
                routers = graph.router_count(),
                switches = graph.switch_count(),
                links = graph.links().len(),
                "Dynamic extraction finished"
            );
        })
    }
}

impl TopologyExtractor for DynamicExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Dynamic
    }

    fn extract(&self, source: &SourceFile) -> Result<Graph, ExtractionError> {
        thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("topoextract-interpreter".to_string())
                .stack_size(INTERPRETER_STACK_SIZE)
                .spawn_scoped(scope, || {
                    let env: Rc<dyn ExecutionEnvironment> =
                        Rc::new(SimulatedRuntime::new(self.fs.clone(), self.settings.clone()));
                    self.extract_with(source, env)
                });
            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    Err(ExtractionError::ModuleLoad("interpreter panicked".to_string()))
                }),
                Err(e) => Err(ExtractionError::ModuleLoad(format!(
                    "could not start interpreter thread: {}",
                    e
                ))),
            }
        })
    }
}

/// Result of one entry point
enum Attempt {
    Built(Graph),
    Nothing,
}

struct Session {
    interp: Interpreter,
    observer: Rc<RefCell<CaptureObserver>>,
    module: Rc<ModuleObj>,
    modname: String,
    empty_seen: bool,
    construction_error: Option<String>,
}

impl Session {
    fn run(&mut self) -> Result<Graph, ExtractionError> {
        let mut builders = Vec::new();
        if let Some(build) = self.user_callable(BUILD_FUNCTION) {
            builders.push((BUILD_FUNCTION.to_string(), build));
        }
        for name in self.builder_names() {
            if let Some(builder) = self.user_callable(&name) {
                builders.push((name, builder));
            }
        }
        for (name, builder) in builders {
            debug!(entry = %name, "Trying builder function");
            let attempt = self.run_builder(&name, builder);
            if let Some(graph) = self.accept(attempt) {
                return Ok(graph);
            }
        }

        if let Some(setup) = self.user_callable(SETUP_FUNCTION) {
            debug!(entry = SETUP_FUNCTION, "Trying setup routine");
            let args = self.module_args(&setup);
            let attempt = self.run_captured(SETUP_FUNCTION, &setup, args);
            if let Some(graph) = self.accept(attempt) {
                return Ok(graph);
            }
        }

        for name in self.fixture_names() {
            let Some(fixture) = self.user_callable(&name) else {
                continue;
            };
            debug!(entry = %name, "Trying fixture");
            let args = if positional_count(&fixture) > 0 {
                vec![framework::fixture_request(self.module.clone())]
            } else {
                Vec::new()
            };
            let attempt = self.run_captured(&name, &fixture, args);
            if let Some(graph) = self.accept(attempt) {
                return Ok(graph);
            }
        }

        if self.empty_seen {
            return Ok(Graph::new());
        }
        match self.construction_error.take() {
            Some(message) => Err(ExtractionError::Construction(message)),
            None => Err(ExtractionError::NoEntryPoint),
        }
    }

    /// First non-empty graph wins; empty ones are remembered
    fn accept(&mut self, attempt: Attempt) -> Option<Graph> {
        match attempt {
            Attempt::Built(graph) if !graph.is_empty() => Some(graph),
            Attempt::Built(_) => {
                self.empty_seen = true;
                None
            }
            Attempt::Nothing => None,
        }
    }

    /// Module-level function or class defined by the file itself
    fn user_callable(&self, name: &str) -> Option<Value> {
        match self.module.get(name)? {
            Value::Function(function) if Rc::ptr_eq(&function.globals, &self.module) => {
                Some(Value::Function(function))
            }
            Value::Class(class) => Some(Value::Class(class)),
            _ => None,
        }
    }

    fn builder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .module
            .dict
            .borrow()
            .keys()
            .filter(|name| name.as_str() != BUILD_FUNCTION && is_builder_name(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn fixture_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .module
            .dict
            .borrow()
            .keys()
            .filter(|name| !name.starts_with("test_") && is_fixture_name(name))
            .cloned()
            .collect();
        names.sort_by_key(|name| (name.as_str() != "tgen", name.as_str() != "_tgen", name.clone()));
        names
    }

    fn module_args(&self, function: &Value) -> Vec<Value> {
        if positional_count(function) > 0 {
            vec![Value::Module(self.module.clone())]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self, policy: CapturePolicy) {
        self.interp.set_current_topogen(None);
        let mut observer = self.observer.borrow_mut();
        observer.set_policy(policy);
        observer.take();
    }

    /// Hand a builder function to `Topogen` and keep whatever it built
    fn run_builder(&mut self, name: &str, builder: Value) -> Attempt {
        self.reset(CapturePolicy::Observe);
        let modname = self.modname.clone();
        let interp = &mut self.interp;
        let result = guarded(|| framework::construct_topogen(interp, builder, &modname));
        match result {
            Ok(Ok(_)) | Ok(Err(Unwind::Halt)) => self.captured(),
            Ok(Err(Unwind::Raise(exc))) => {
                let message = self.interp.describe(&exc);
                self.keep_partial(name, message)
            }
            Ok(Err(_)) => self.captured(),
            Err(panic) => {
                self.interp.recover();
                self.keep_partial(name, format!("interpreter panicked: {}", panic))
            }
        }
    }

    /// Graph built before the builder failed; otherwise the failure is kept for reporting
    fn keep_partial(&mut self, name: &str, message: String) -> Attempt {
        // the builder may fail after the graph is complete
        match self.partial_graph() {
            Some(graph) => {
                debug!(entry = name, error = %message, "Builder failed after building nodes");
                Attempt::Built(graph)
            }
            None => {
                warn!(entry = name, error = %message, "Builder function failed");
                self.construction_error.get_or_insert(message);
                Attempt::Nothing
            }
        }
    }

    /// Run a setup routine or fixture until its topology is built
    fn run_captured(&mut self, name: &str, function: &Value, args: Vec<Value>) -> Attempt {
        self.reset(CapturePolicy::StopAfterFirst);
        let result = guarded(|| self.call_one_step(function, args));
        match result {
            Ok(Ok(_)) | Ok(Err(Unwind::Halt)) => {}
            Ok(Err(Unwind::Raise(exc))) => {
                let message = self.interp.describe(&exc);
                debug!(entry = name, error = %message, "Entry point raised, ignoring");
            }
            Ok(Err(_)) => {}
            Err(panic) => {
                self.interp.recover();
                warn!(entry = name, error = %panic, "Interpreter panicked in entry point");
                if let Some(graph) = self.partial_graph() {
                    return Attempt::Built(graph);
                }
                self.construction_error
                    .get_or_insert(format!("interpreter panicked: {}", panic));
                return Attempt::Nothing;
            }
        }
        self.captured()
    }

    fn call_one_step(&mut self, function: &Value, args: Vec<Value>) -> Exec<Value> {
        let result = self.interp.call(function, args, Vec::new())?;
        match &result {
            Value::Generator(generator) => {
                let generator = generator.clone();
                self.interp.advance(&generator)
            }
            _ => Ok(result),
        }
    }

    fn captured(&mut self) -> Attempt {
        match self.observer.borrow_mut().take() {
            Some(graph) => Attempt::Built(graph),
            None => Attempt::Nothing,
        }
    }

    fn partial_graph(&self) -> Option<Graph> {
        self.interp
            .current_topogen()
            .map(|tgen| tgen.graph())
            .filter(|graph| !graph.is_empty())
    }
}

fn is_fixture_name(name: &str) -> bool {
    name == "tgen" || name == "_tgen" || name.ends_with("_tgen")
}

fn positional_count(function: &Value) -> usize {
    match function {
        Value::Function(function) => function.def.params.positional.len(),
        _ => 0,
    }
}

/// Runs `f`, turning a host panic into its message
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::FailureKind;
    use crate::fs::MockFileSystem;
    use crate::runtime::{CommandStatus, MockExecutionEnvironment};
    use std::path::PathBuf;
    use yare::parameterized;

    fn extractor() -> (Arc<MockFileSystem>, DynamicExtractor) {
        let fs = Arc::new(MockFileSystem::new());
        let extractor = DynamicExtractor::new(fs.clone(), RuntimeSettings::with_rundir("/mock/logs"));
        (fs, extractor)
    }

    fn source(text: &str) -> SourceFile {
        SourceFile::new(PathBuf::from("/mock/demo/test_demo.py"), text)
    }

    fn adjacency(graph: &Graph) -> Vec<(String, Vec<String>)> {
        graph
            .routers()
            .map(|node| {
                let mut peers: Vec<String> = node
                    .interfaces()
                    .values()
                    .map(|peer| peer.node.clone())
                    .collect();
                peers.sort();
                peers.dedup();
                (node.name.clone(), peers)
            })
            .collect()
    }

    #[test]
    fn test_build_topo_function() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
from lib.topogen import Topogen, TopoRouter, get_topogen

def build_topo(tgen):
    for routern in range(1, 3):
        tgen.add_router('r{}'.format(routern))
    switch = tgen.add_switch('s1')
    switch.add_link(tgen.gears['r1'])
    switch.add_link(tgen.gears['r2'])
    tgen.add_link(tgen.gears['r1'], tgen.gears['r2'])

def setup_module(mod):
    tgen = Topogen(build_topo, mod.__name__)
    tgen.start_topology()
",
            ))
            .unwrap();

        assert_eq!(graph.router_count(), 2);
        assert_eq!(graph.switch_count(), 1);
        assert_eq!(graph.links().len(), 3);
    }

    #[test]
    fn test_graph_survives_late_raise() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
def build_topo(tgen):
    for i in range(1, 4):
        tgen.add_router('r%d' % i)
    sw = tgen.add_switch('s1')
    for i in range(1, 4):
        sw.add_link(tgen.gears['r%d' % i])
    raise RuntimeError('namespaces need root')
",
            ))
            .unwrap();

        assert_eq!(
            adjacency(&graph),
            vec![
                ("r1".to_string(), vec!["s1".to_string()]),
                ("r2".to_string(), vec!["s1".to_string()]),
                ("r3".to_string(), vec!["s1".to_string()]),
            ]
        );
    }

    #[test]
    fn test_builder_name_variants() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
from lib.topojson import build_topo_from_json

def build_topology_vrf(tgen):
    tgen.add_router('ce1')
",
            ))
            .unwrap();
        assert!(graph.contains("ce1"));
    }

    #[test]
    fn test_setup_module_stops_after_topology() {
        let (fs, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
import os
from lib.topogen import Topogen

def setup_module(module):
    topodef = {'s1': ('r1', 'r2'), 's2': ('r2', 'r3')}
    tgen = Topogen(topodef, module.__name__)
    tgen.start_topology()
    os.makedirs('/mock/should-not-exist')
",
            ))
            .unwrap();

        assert_eq!(graph.router_count(), 3);
        assert_eq!(graph.switch_count(), 2);
        assert!(fs.exists(std::path::Path::new("/mock/logs/test_demo")));
        assert!(!fs.exists(std::path::Path::new("/mock/should-not-exist")));
    }

    #[test]
    fn test_fixture_generator() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
import pytest
from lib.topogen import Topogen

@pytest.fixture(scope='module')
def tgen(request):
    topodef = {'s1': ('r1', 'r2')}
    tgen = Topogen(topodef, request.module.__name__)
    tgen.start_topology()
    yield tgen
    tgen.stop_topology()
",
            ))
            .unwrap();
        assert_eq!(graph.router_count(), 2);
    }

    #[test]
    fn test_setup_failure_is_swallowed() {
        let (_, extractor) = extractor();
        let err = extractor
            .extract(&source(
                "\
def setup_module(mod):
    raise RuntimeError('no topology here')
",
            ))
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoEntryPoint);
    }

    #[test]
    fn test_no_entry_point() {
        let (_, extractor) = extractor();
        let err = extractor
            .extract(&source("def test_nothing():\n    assert True\n"))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Discovery);
    }

    #[test]
    fn test_module_load_failures() {
        let (_, extractor) = extractor();

        let err = extractor.extract(&source("def broken(:\n")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Load);

        let err = extractor.extract(&source("x = undefined_name\n")).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::ModuleLoad("NameError: name 'undefined_name' is not defined".to_string())
        );
    }

    #[test]
    fn test_builder_failure_before_nodes() {
        let (_, extractor) = extractor();
        let err = extractor
            .extract(&source("def build_topo(tgen):\n    raise ValueError('bad')\n"))
            .unwrap_err();
        assert_eq!(err, ExtractionError::Construction("ValueError: bad".to_string()));
    }

    #[test]
    fn test_empty_topology_is_reported_empty() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source("def build_topo(tgen):\n    pass\n"))
            .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_repeated_extraction_is_identical() {
        let (_, extractor) = extractor();
        let file = source(
            "\
counter = [0]

def build_topo(tgen):
    counter[0] += 1
    tgen.add_router('r{}'.format(counter[0]))
",
        );
        let first = extractor.extract(&file).unwrap();
        let second = extractor.extract(&file).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("r1"));
    }

    #[test]
    fn test_environment_is_injected() {
        let (_, extractor) = extractor();
        let mut env = MockExecutionEnvironment::new();
        env.expect_has_privileges().return_const(true);
        env.expect_adjust_limits().return_const(());
        env.expect_module_present().return_const(false);
        env.expect_option().return_const(None::<String>);
        env.expect_log().returning(|_, _, _| ());
        env.expect_run_command()
            .withf(|command| command.starts_with("mkdir -p /tmp/topotests/test_demo"))
            .times(1)
            .returning(|_| CommandStatus::success());

        let graph = extractor
            .extract_with(
                &source("def build_topo(tgen):\n    tgen.add_switch()\n"),
                Rc::new(env),
            )
            .unwrap();
        assert!(graph.contains("s1"));
    }

    #[parameterized(
        huge_precision = { "x = '%.1000000000f' % 1.0" },
        huge_range_step = { "x = [i for i in range(0, 9223372036854775807, 4611686018427387904)]" },
        min_floor_div = { "x = (-9223372036854775807 - 1) // -1" },
        modulo_by_max = { "x = 5 % 9223372036854775807" },
        repeat_str = { "x = 'a' * 10000000000" },
        repeat_str_max = { "x = 'abc' * 9223372036854775807" },
        repeat_list = { "x = [0] * 10000000000" },
        format_width = { "x = '{:>100000000000}'.format('a')" },
        percent_width = { "x = '%100000000000d' % 1" },
        f_string_width = { "x = f'{1:>100000000000}'" },
        zfill = { "x = 'a'.zfill(10**11)" },
        ljust = { "x = 'a'.ljust(10**11)" },
        pow_overflow = { "x = 2**64" },
        shift_overflow = { "x = 1 << 70" },
        negative_shift = { "x = 1 << -1" },
        unsupported_builtin = { "raise NotImplementedError('not simulated')" },
    )]
    fn test_builder_keeps_graph_after_failing_statement(statement: &str) {
        let (_, extractor) = extractor();
        let text = format!("def build_topo(tgen):\n    tgen.add_router('r1')\n    {}\n", statement);
        let graph = extractor.extract(&source(&text)).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.contains("r1"));
    }

    #[parameterized(
        repeat_str = { "x = 'a' * 10000000000", "MemoryError" },
        huge_precision = { "x = '%.1000000000f' % 1.0", "ValueError: precision too big" },
        pow_overflow = { "x = 2**64", "OverflowError" },
        unsupported = { "raise NotImplementedError('not simulated')", "NotImplementedError" },
    )]
    fn test_failure_before_nodes_is_construction(statement: &str, expected: &str) {
        let (_, extractor) = extractor();
        let text = format!("def build_topo(tgen):\n    {}\n    tgen.add_router('r1')\n", statement);
        let err = extractor.extract(&source(&text)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Construction);
        assert!(err.to_string().contains(expected), "{}", err);
    }

    #[test]
    fn test_fixture_reads_config_options() {
        let (_, extractor) = extractor();
        let graph = extractor
            .extract(&source(
                "\
import pytest
from lib.topogen import Topogen

@pytest.fixture(scope='module')
def tgen(request):
    if request.config.getoption('capture') != 'no':
        pytest.skip('output capture must be disabled')
    rundir = request.config.getoption('--rundir')
    routers = ('r1', 'r2') if rundir == '/mock/logs' else ('wrong',)
    tgen = Topogen({'s1': routers}, request.module.__name__)
    tgen.start_topology()
    yield tgen
",
            ))
            .unwrap();
        assert_eq!(graph.router_count(), 2);
        assert!(graph.contains("r1"));
        assert!(!graph.contains("wrong"));
    }

    #[test]
    fn test_guarded_reports_panic_message() {
        assert_eq!(guarded(|| 7), Ok(7));
        assert_eq!(guarded(|| -> i32 { panic!("boom") }), Err("boom".to_string()));
        let owned = String::from("owned message");
        assert_eq!(
            guarded(move || -> i32 { panic!("{}", owned) }),
            Err("owned message".to_string())
        );
    }
}
