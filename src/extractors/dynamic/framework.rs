//! Simulated builder framework
//!
//! Models the `lib.topogen` object graph closely enough that unmodified
//! builder routines run to completion, together with stand-ins for the
//! pytest and standard library modules those routines import. Every effect
//! is routed through the interpreter's execution environment. Routers,
//! switches and the links between them are mirrored into a [`Graph`] and
//! announced to the construction observer as they appear.

use super::builtins::{arg, required};
use super::format;
use super::interpreter::{Exec, Interpreter, Unwind};
use super::value::*;
use crate::graph::{Endpoint, Graph, Link, NodeKind};
use crate::runtime::LimitScope;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::debug;

const MODULES: &[(&str, &[&str])] = &[
    ("lib", &[]),
    (
        "lib.topogen",
        &[
            "lib.topogen.Topogen",
            "lib.topogen.get_topogen",
            "lib.topogen.set_topogen",
            "lib.topogen.TopoGear",
            "lib.topogen.TopoRouter",
            "lib.topogen.TopoSwitch",
            "lib.topogen.TopoHost",
            "lib.topogen.TopoExaBGP",
            "lib.topogen.TopoBMPCollector",
        ],
    ),
    ("lib.topolog", &["lib.topolog.get_logger"]),
    (
        "lib.topotest",
        &[
            "lib.topotest.module_present",
            "lib.topotest.fix_host_limits",
            "lib.topotest.fix_netns_limits",
        ],
    ),
    ("lib.topojson", &["lib.topojson.build_topo_from_json"]),
    (
        "pytest",
        &[
            "pytest.fixture",
            "pytest.skip",
            "pytest.exit",
            "pytest.fail",
            "pytest.param",
            "pytest.importorskip",
        ],
    ),
    (
        "os",
        &[
            "os.system",
            "os.makedirs",
            "os.mkdir",
            "os.chown",
            "os.chmod",
            "os.remove",
            "os.unlink",
            "os.getuid",
            "os.geteuid",
            "os.getpid",
            "os.getcwd",
            "os.getenv",
        ],
    ),
    (
        "os.path",
        &[
            "os.path.join",
            "os.path.dirname",
            "os.path.basename",
            "os.path.abspath",
            "os.path.realpath",
            "os.path.exists",
            "os.path.isdir",
            "os.path.isfile",
            "os.path.splitext",
            "os.path.split",
            "os.path.normpath",
            "os.path.expanduser",
        ],
    ),
    (
        "subprocess",
        &[
            "subprocess.check_call",
            "subprocess.call",
            "subprocess.run",
            "subprocess.check_output",
            "subprocess.getoutput",
            "subprocess.Popen",
        ],
    ),
    ("sys", &["sys.exit"]),
    ("functools", &["functools.partial", "functools.wraps"]),
    ("grp", &["grp.getgrnam"]),
    ("pwd", &["pwd.getpwnam"]),
    ("time", &["time.sleep", "time.time", "time.monotonic"]),
    ("json", &["json.load", "json.loads", "json.dump", "json.dumps"]),
    ("logging", &["logging.getLogger"]),
];

const TOPOGEN_METHODS: &[&str] = &[
    "add_router",
    "add_switch",
    "add_host",
    "add_exabgp_peer",
    "add_bmp_server",
    "add_link",
    "routers",
    "get_gears",
    "routers_have_failure",
    "is_memleak_enabled",
    "start_topology",
    "start_router",
    "stop_topology",
];

const GEAR_METHODS: &[&str] = &[
    "add_link",
    "new_link",
    "run",
    "cmd",
    "cmd_raises",
    "vtysh_cmd",
    "vtysh_multicmd",
];

const LOGGER_LEVELS: &[&str] = &["debug", "info", "warning", "warn", "error", "critical", "exception"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GearKind {
    Router,
    Switch,
    Host,
    ExaBgpPeer,
    BmpServer,
}

impl GearKind {
    pub fn type_name(self) -> &'static str {
        match self {
            GearKind::Router => "TopoRouter",
            GearKind::Switch => "TopoSwitch",
            GearKind::Host => "TopoHost",
            GearKind::ExaBgpPeer => "TopoExaBGP",
            GearKind::BmpServer => "TopoBMPCollector",
        }
    }

    /// Graph node kind; hosts and peers stay out of the graph
    pub fn node_kind(self) -> Option<NodeKind> {
        match self {
            GearKind::Router => Some(NodeKind::Router),
            GearKind::Switch => Some(NodeKind::Switch),
            _ => None,
        }
    }

    fn auto_prefix(self) -> &'static str {
        match self {
            GearKind::Router => "r",
            GearKind::Switch => "s",
            GearKind::Host => "host",
            GearKind::ExaBgpPeer => "peer",
            GearKind::BmpServer => "bmp",
        }
    }

    fn label(self) -> &'static str {
        match self {
            GearKind::Router => "router",
            GearKind::Switch => "switch",
            GearKind::Host => "host",
            GearKind::ExaBgpPeer => "exabgp peer",
            GearKind::BmpServer => "bmp server",
        }
    }

    /// Whether a gear of this kind is an instance of the named framework class
    fn is_a(self, class: &str) -> bool {
        match class.rsplit('.').next().unwrap_or(class) {
            "TopoGear" => true,
            "TopoHost" => matches!(self, GearKind::Host | GearKind::ExaBgpPeer | GearKind::BmpServer),
            other => other == self.type_name(),
        }
    }
}

struct GearState {
    name: String,
    kind: GearKind,
    linkn: usize,
    /// Local interface to (peer gear, peer interface)
    links: BTreeMap<String, (String, String)>,
    attrs: HashMap<String, Value>,
}

/// The topology generator object handed to builder routines
pub struct Topogen {
    modname: String,
    logdir: String,
    graph: RefCell<Graph>,
    gears: RefCell<Vec<GearState>>,
    counters: RefCell<HashMap<GearKind, usize>>,
    attrs: RefCell<HashMap<String, Value>>,
}

impl Topogen {
    fn new(modname: &str, logdir: String) -> Self {
        Self {
            modname: modname.to_string(),
            logdir,
            graph: RefCell::new(Graph::new()),
            gears: RefCell::new(Vec::new()),
            counters: RefCell::new(HashMap::new()),
            attrs: RefCell::new(HashMap::new()),
        }
    }

    /// Snapshot of the routers, switches and links built so far
    pub fn graph(&self) -> Graph {
        self.graph.borrow().clone()
    }

    pub fn gear_kind(&self, name: &str) -> Option<GearKind> {
        self.gears
            .borrow()
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.kind)
    }

    /// Gear names in creation order
    pub fn gear_names(&self) -> Vec<String> {
        self.gears.borrow().iter().map(|g| g.name.clone()).collect()
    }

    pub fn gear_type_name(&self, name: &str) -> &'static str {
        self.gear_kind(name)
            .map(GearKind::type_name)
            .unwrap_or("TopoGear")
    }

    fn add_gear(&self, interp: &Interpreter, name: Option<String>, kind: GearKind) -> Exec<String> {
        let counter = self.counters.borrow().get(&kind).copied().unwrap_or(1);
        let name = name.unwrap_or_else(|| format!("{}{}", kind.auto_prefix(), counter));
        if self.gear_kind(&name).is_some() {
            return Err(interp.raise("KeyError", format!("{} {} already exists", kind.label(), name)));
        }
        self.gears.borrow_mut().push(GearState {
            name: name.clone(),
            kind,
            linkn: 0,
            links: BTreeMap::new(),
            attrs: HashMap::new(),
        });
        self.counters.borrow_mut().insert(kind, counter + 1);
        debug!(gear = %name, kind = kind.label(), "Adding gear");

        if let Some(node_kind) = kind.node_kind() {
            if let Err(e) = self.graph.borrow_mut().add_node(&name, node_kind) {
                debug!(error = %e, "Gear not mirrored into graph");
                return Ok(name);
            }
            let flow = interp.observer().node_added(&name, node_kind);
            interp.flow(flow)?;
        }
        Ok(name)
    }

    /// Next automatic interface name of a gear
    fn new_link(&self, gear: &str) -> String {
        let mut gears = self.gears.borrow_mut();
        match gears.iter_mut().find(|g| g.name == gear) {
            Some(state) => {
                let ifname = format!("{}-eth{}", state.name, state.linkn);
                state.linkn += 1;
                ifname
            }
            None => format!("{}-eth0", gear),
        }
    }

    /// Fails unless `gear` exists and `myif` is still free on it
    fn check_interface(&self, interp: &Interpreter, gear: &str, myif: &str) -> Exec<()> {
        let gears = self.gears.borrow();
        let Some(state) = gears.iter().find(|g| g.name == gear) else {
            return Err(interp.raise("ValueError", "invalid node type"));
        };
        if state.links.contains_key(myif) {
            return Err(interp.raise("KeyError", "interface already exists"));
        }
        Ok(())
    }

    fn register_link(&self, gear: &str, myif: &str, peer: &str, peerif: &str) {
        if let Some(state) = self.gears.borrow_mut().iter_mut().find(|g| g.name == gear) {
            state
                .links
                .insert(myif.to_string(), (peer.to_string(), peerif.to_string()));
        }
    }

    fn add_link(
        &self,
        interp: &Interpreter,
        a: &str,
        b: &str,
        if_a: Option<String>,
        if_b: Option<String>,
    ) -> Exec<()> {
        if self.gear_kind(a).is_none() || self.gear_kind(b).is_none() {
            return Err(interp.raise("ValueError", "invalid node type"));
        }
        let if_a = if_a.unwrap_or_else(|| self.new_link(a));
        let if_b = if_b.unwrap_or_else(|| self.new_link(b));
        // both ends are checked before either is recorded
        self.check_interface(interp, a, &if_a)?;
        self.check_interface(interp, b, &if_b)?;
        if a == b && if_a == if_b {
            return Err(interp.raise("KeyError", "interface already exists"));
        }
        self.register_link(a, &if_a, b, &if_b);
        self.register_link(b, &if_b, a, &if_a);

        let mirrored = self.gear_kind(a).and_then(GearKind::node_kind).is_some()
            && self.gear_kind(b).and_then(GearKind::node_kind).is_some();
        if !mirrored {
            return Ok(());
        }
        let link = Link {
            a: Endpoint::new(a, if_a),
            b: Endpoint::new(b, if_b),
        };
        let added = self
            .graph
            .borrow_mut()
            .add_link(link.a.clone(), link.b.clone());
        match added {
            Ok(()) => {
                let flow = interp.observer().link_added(&link);
                interp.flow(flow)
            }
            Err(e) => {
                debug!(error = %e, "Link not mirrored into graph");
                Ok(())
            }
        }
    }

    fn gear_links(&self, gear: &str) -> Vec<(String, String, String)> {
        self.gears
            .borrow()
            .iter()
            .find(|g| g.name == gear)
            .map(|g| {
                g.links
                    .iter()
                    .map(|(myif, (peer, peerif))| (myif.clone(), peer.clone(), peerif.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn gear_linkn(&self, gear: &str) -> usize {
        self.gears
            .borrow()
            .iter()
            .find(|g| g.name == gear)
            .map(|g| g.linkn)
            .unwrap_or(0)
    }

    fn gear_attr(&self, gear: &str, name: &str) -> Option<Value> {
        self.gears
            .borrow()
            .iter()
            .find(|g| g.name == gear)
            .and_then(|g| g.attrs.get(name).cloned())
    }

    fn set_gear_attr(&self, gear: &str, name: &str, value: Value) {
        if let Some(state) = self.gears.borrow_mut().iter_mut().find(|g| g.name == gear) {
            state.attrs.insert(name.to_string(), value);
        }
    }
}

fn gear_value(tgen: &Rc<Topogen>, name: String) -> Value {
    Value::native(Native::Gear(tgen.clone(), name))
}

/// Name of a gear belonging to `tgen`
fn gear_name(value: &Value, tgen: &Rc<Topogen>) -> Option<String> {
    match value {
        Value::Native(native) => match native.as_ref() {
            Native::Gear(owner, name) if Rc::ptr_eq(owner, tgen) => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn gear_dict(tgen: &Rc<Topogen>, keep: impl Fn(&Value) -> bool) -> Value {
    let mut dict = Dict::new();
    for name in tgen.gear_names() {
        let gear = gear_value(tgen, name.clone());
        if keep(&gear) {
            dict.insert(Value::str(&name), gear);
        }
    }
    Value::dict(dict)
}

fn optional_string(interp: &mut Interpreter, value: Option<Value>) -> Exec<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => interp.to_str(&other).map(Some),
    }
}

// ---- modules -----------------------------------------------------------

pub fn is_known_module(name: &str) -> bool {
    MODULES.iter().any(|(module, _)| *module == name)
}

/// Build a simulated module, or `None` when the name is not modeled
pub fn create_module(interp: &mut Interpreter, name: &str) -> Option<Rc<ModuleObj>> {
    let (_, functions) = MODULES.iter().find(|(module, _)| *module == name)?;
    let module = Rc::new(ModuleObj::new(name, true));
    for &qualified in functions.iter() {
        let leaf = qualified.rsplit('.').next().unwrap_or(qualified);
        module.set(leaf, Value::Builtin(qualified));
    }
    match name {
        "lib.topolog" => module.set("logger", Value::native(Native::Logger("topolog".to_string()))),
        "pytest" => module.set("mark", Value::native(Native::namespace("mark", Vec::new()))),
        "os" => {
            module.set("environ", Value::dict(Dict::new()));
            module.set("sep", Value::str("/"));
            module.set("name", Value::str("posix"));
            module.set("devnull", Value::str("/dev/null"));
            module.set("linesep", Value::str("\n"));
        }
        "subprocess" => {
            module.set("PIPE", Value::Int(-1));
            module.set("STDOUT", Value::Int(-2));
            module.set("DEVNULL", Value::Int(-3));
            module.set(
                "CalledProcessError",
                Value::Class(interp.exception_class("CalledProcessError")),
            );
        }
        "sys" => {
            module.set("path", Value::list(vec![Value::str(interp.source_dir())]));
            module.set("argv", Value::list(vec![Value::str("pytest")]));
            module.set(
                "version_info",
                Value::tuple(vec![Value::Int(3), Value::Int(11), Value::Int(0)]),
            );
            module.set("version", Value::str("3.11.0"));
            module.set("platform", Value::str("linux"));
            module.set("maxsize", Value::Int(i64::MAX));
        }
        "json" => module.set("JSONDecodeError", Value::Class(interp.exception_class("ValueError"))),
        "logging" => {
            for (level, value) in [("DEBUG", 10), ("INFO", 20), ("WARNING", 30), ("ERROR", 40), ("CRITICAL", 50)] {
                module.set(level, Value::Int(value));
            }
        }
        _ => {}
    }
    Some(module)
}

// ---- framework functions ----------------------------------------------

pub fn call(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
    match name {
        "lib.topogen.Topogen" => {
            let topodef = arg(&args, &kwargs, 0, "topodef").unwrap_or(Value::None);
            let modname = optional_string(interp, arg(&args, &kwargs, 1, "modname"))?
                .unwrap_or_else(|| "unnamed".to_string());
            construct_topogen(interp, topodef, &modname)
        }
        "lib.topogen.get_topogen" => Ok(interp
            .current_topogen()
            .map(|tgen| Value::native(Native::Topogen(tgen)))
            .unwrap_or(Value::None)),
        "lib.topogen.set_topogen" => {
            let tgen = match arg(&args, &kwargs, 0, "tgen") {
                Some(Value::Native(native)) => match native.as_ref() {
                    Native::Topogen(tgen) => Some(tgen.clone()),
                    _ => None,
                },
                _ => None,
            };
            interp.set_current_topogen(tgen);
            Ok(Value::None)
        }
        "lib.topogen.TopoGear"
        | "lib.topogen.TopoRouter"
        | "lib.topogen.TopoSwitch"
        | "lib.topogen.TopoHost"
        | "lib.topogen.TopoExaBGP"
        | "lib.topogen.TopoBMPCollector" => Err(interp.raise(
            "TypeError",
            "gears are created through Topogen.add_router/add_switch",
        )),
        "lib.topolog.get_logger" | "logging.getLogger" => {
            let logger = optional_string(interp, arg(&args, &kwargs, 0, "name"))?
                .unwrap_or_else(|| "root".to_string());
            Ok(Value::native(Native::Logger(logger)))
        }
        "lib.topotest.module_present" => {
            let module = optional_string(interp, arg(&args, &kwargs, 0, "module"))?.unwrap_or_default();
            Ok(Value::Bool(interp.env().module_present(&module)))
        }
        "lib.topotest.fix_host_limits" => {
            interp.env().adjust_limits(LimitScope::Host);
            Ok(Value::None)
        }
        "lib.topotest.fix_netns_limits" => {
            interp.env().adjust_limits(LimitScope::Namespace);
            Ok(Value::None)
        }
        "lib.topojson.build_topo_from_json" => build_topo_from_json(interp, &args, &kwargs),
        "pytest.fixture" => match args.first() {
            Some(function) if kwargs.is_empty() && args.len() == 1 && function.is_callable() => {
                Ok(function.clone())
            }
            _ => Ok(Value::Builtin("pytest.fixture")),
        },
        "pytest.skip" => Err(Unwind::Raise(interp.new_exception("Skipped", args))),
        "pytest.exit" => Err(Unwind::Raise(interp.new_exception("Exit", args))),
        "pytest.fail" => Err(Unwind::Raise(interp.new_exception("Failed", args))),
        "pytest.param" => Ok(Value::tuple(args)),
        "pytest.importorskip" => {
            let module = required(interp, &args, &kwargs, 0, "modname", name)?;
            let module = interp.to_str(&module)?;
            Ok(Value::Module(interp.import_module(&module)?))
        }
        _ if name.starts_with("os.path.") => os_path(interp, name, &args),
        _ if name.starts_with("os.") => os_function(interp, name, &args, &kwargs),
        _ if name.starts_with("subprocess.") => subprocess(interp, name, args, &kwargs),
        "sys.exit" => Err(Unwind::Raise(interp.new_exception("SystemExit", args))),
        "functools.partial" => {
            let mut args = args.into_iter();
            let func = args
                .next()
                .ok_or_else(|| interp.raise("TypeError", "partial() missing required argument 'func'"))?;
            Ok(Value::Partial(Rc::new(Partial {
                func,
                args: args.collect(),
                kwargs,
            })))
        }
        "functools.wraps" => Ok(Value::Builtin("functools.wraps.decorator")),
        "functools.wraps.decorator" => Ok(args.into_iter().next().unwrap_or(Value::None)),
        "grp.getgrnam" | "pwd.getpwnam" => Ok(Value::tuple(vec![Value::Int(0), Value::Int(0), Value::Int(0)])),
        "time.sleep" => Ok(Value::None),
        "time.time" | "time.monotonic" => Ok(Value::Float(0.0)),
        "json.loads" | "json.load" => {
            let source = required(interp, &args, &kwargs, 0, "s", name)?;
            let text = match &source {
                Value::Native(native) => match native.as_ref() {
                    Native::File(_, content) => content.clone(),
                    _ => interp.to_str(&source)?,
                },
                other => interp.to_str(other)?,
            };
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Ok(json_to_value(&json)),
                Err(e) => Err(interp.raise("ValueError", format!("Expecting value: {}", e))),
            }
        }
        "json.dumps" => {
            let value = required(interp, &args, &kwargs, 0, "obj", name)?;
            let json = value_to_json(&value).map_err(|e| interp.raise("TypeError", e))?;
            let indented = kwargs
                .iter()
                .any(|(k, v)| k == "indent" && !v.is_none());
            let text = if indented {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::str)
                .map_err(|e| interp.raise("ValueError", e.to_string()))
        }
        "json.dump" => Ok(Value::None),
        _ => Err(interp.raise("NotImplementedError", format!("{}() is not simulated", name))),
    }
}

/// `Topogen(topodef, modname)`: framework start-up followed by topology construction
pub fn construct_topogen(interp: &mut Interpreter, topodef: Value, modname: &str) -> Exec<Value> {
    let env = interp.env();
    if !env.has_privileges() {
        return Err(Unwind::Raise(interp.new_exception(
            "Skipped",
            vec![Value::str("topology tests require root privileges")],
        )));
    }
    env.adjust_limits(LimitScope::Host);
    for module in ["mpls-router", "mpls-iptunnel"] {
        if !env.module_present(module) {
            env.log(
                "topolog",
                "info",
                &format!("MPLS tests will not run (missing {} kernel module)", module),
            );
        }
    }

    let rundir = env
        .option("rundir")
        .unwrap_or_else(|| "/tmp/topotests".to_string());
    let logdir = format!("{}/{}", rundir.trim_end_matches('/'), modname);
    env.run_command(&format!("mkdir -p {0} && chmod 1777 {0}", logdir));
    env.log(modname, "info", &format!("loading topology: {}", modname));
    env.adjust_limits(LimitScope::Namespace);

    let tgen = Rc::new(Topogen::new(modname, logdir));
    interp.set_current_topogen(Some(tgen.clone()));
    let value = Value::native(Native::Topogen(tgen.clone()));

    match &topodef {
        Value::None => {}
        Value::Dict(dict) => {
            let dict = dict.borrow().clone();
            add_topology_from_dict(interp, &tgen, &dict)?;
        }
        Value::Str(path) => {
            let json = read_json_topology(interp, path)?;
            tgen.attrs
                .borrow_mut()
                .insert("json_topo".to_string(), json_to_value(&json));
            apply_json_topology(interp, &tgen, &json)?;
        }
        Value::Class(class) => {
            let instance = interp.instantiate(class, Vec::new(), Vec::new())?;
            if class.lookup("build").is_some() {
                let build = interp.get_attr(&instance, "build")?;
                interp.call(&build, Vec::new(), Vec::new())?;
            }
        }
        callable if callable.is_callable() => {
            interp.call(callable, vec![value.clone()], Vec::new())?;
        }
        other => debug!(topodef = %other.type_name(), "Topology definition builds nothing"),
    }

    let flow = {
        let graph = tgen.graph.borrow();
        interp.observer().topology_built(&graph)
    };
    interp.flow(flow)?;
    Ok(value)
}

/// Ordering key splitting a node name into text and number runs, so `r2` sorts before `r10`
fn natural_key(name: &str) -> Vec<(String, u64)> {
    let mut key = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if !digits.is_empty() {
                key.push((std::mem::take(&mut text), digits.parse().unwrap_or(u64::MAX)));
                digits.clear();
            }
            text.push(c);
        }
    }
    if !text.is_empty() || !digits.is_empty() {
        key.push((text, digits.parse().unwrap_or(0)));
    }
    key
}

fn compare_names(a: &Value, b: &Value) -> Ordering {
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => natural_key(x).cmp(&natural_key(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Entries of a dictionary topology value: one `name[:ifname]` string or a sequence of them
fn dict_entries(interp: &mut Interpreter, value: &Value) -> Exec<Vec<(String, Option<String>)>> {
    let items = match value {
        Value::Str(_) => vec![value.clone()],
        other => interp.iterate(other)?,
    };
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let text = interp.to_str(&item)?;
        let mut parts = text.splitn(2, ':');
        let name = parts.next().unwrap_or_default().to_string();
        entries.push((name, parts.next().map(str::to_string)));
    }
    Ok(entries)
}

/// Build from `{"s1": ("r1", "r2"), "s2": "r3:eth1"}`: keys are switches, entries routers
fn add_topology_from_dict(interp: &mut Interpreter, tgen: &Rc<Topogen>, topodef: &Dict) -> Exec<()> {
    let mut keys = topodef.keys();
    keys.sort_by(compare_names);

    let mut plan = Vec::with_capacity(keys.len());
    for key in &keys {
        let value = topodef.get(key).unwrap_or(Value::None);
        plan.push((key.as_str().map(str::to_string), dict_entries(interp, &value)?));
    }

    for (_, entries) in &plan {
        for (name, _) in entries {
            if tgen.gear_kind(name).is_none() {
                tgen.add_gear(interp, Some(name.clone()), GearKind::Router)?;
            }
        }
    }
    for (switch, _) in &plan {
        if let Some(switch) = switch {
            if tgen.gear_kind(switch).is_none() {
                tgen.add_gear(interp, Some(switch.clone()), GearKind::Switch)?;
            }
        }
    }
    for (switch, entries) in &plan {
        let Some(switch) = switch else { continue };
        for (name, ifname) in entries {
            let sifname = format!("{}-{}-eth{}", switch, name, tgen.gear_linkn(switch));
            tgen.add_link(interp, switch, name, Some(sifname), ifname.clone())?;
        }
    }
    Ok(())
}

fn read_json_topology(interp: &mut Interpreter, path: &str) -> Exec<serde_json::Value> {
    let resolved = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", interp.source_dir(), path)
    };
    let Some(text) = interp.env().read_file(&resolved) else {
        return Err(interp.raise(
            "FileNotFoundError",
            format!("[Errno 2] No such file or directory: '{}'", path),
        ));
    };
    serde_json::from_str(&text)
        .map_err(|e| interp.raise("ValueError", format!("invalid JSON topology {}: {}", path, e)))
}

fn build_topo_from_json(interp: &mut Interpreter, args: &[Value], kwargs: &[(String, Value)]) -> Exec<Value> {
    let target = required(interp, args, kwargs, 0, "tgen", "build_topo_from_json")?;
    let tgen = match &target {
        Value::Native(native) => match native.as_ref() {
            Native::Topogen(tgen) => tgen.clone(),
            _ => return Err(interp.raise("TypeError", "build_topo_from_json() expects a Topogen")),
        },
        _ => return Err(interp.raise("TypeError", "build_topo_from_json() expects a Topogen")),
    };
    let topo = match arg(args, kwargs, 1, "topo") {
        Some(value) if !value.is_none() => value,
        _ => tgen.attrs.borrow().get("json_topo").cloned().ok_or_else(|| {
            interp.raise("AttributeError", "'Topogen' object has no attribute 'json_topo'")
        })?,
    };
    let json = value_to_json(&topo).map_err(|e| interp.raise("TypeError", e))?;
    apply_json_topology(interp, &tgen, &json)?;
    Ok(Value::None)
}

fn apply_json_topology(interp: &mut Interpreter, tgen: &Rc<Topogen>, json: &serde_json::Value) -> Exec<()> {
    let plan = json_plan(json).map_err(|missing| interp.raise("KeyError", missing))?;
    for router in plan.routers {
        tgen.add_gear(interp, Some(router), GearKind::Router)?;
    }
    for switch in plan.switches {
        tgen.add_gear(interp, Some(switch), GearKind::Switch)?;
    }
    for link in plan.links {
        tgen.add_link(interp, &link.from, &link.to, Some(link.from_if), Some(link.to_if))?;
    }
    Ok(())
}

/// Gears and links a JSON topology produces, in creation order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPlan {
    pub routers: Vec<String>,
    pub switches: Vec<String>,
    pub links: Vec<PlannedLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub from: String,
    pub to: String,
    pub from_if: String,
    pub to_if: String,
}

fn first_number(name: &str) -> u64 {
    name.chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

fn links_of<'a>(section: &'a serde_json::Value, node: &str) -> Vec<(&'a String, &'a serde_json::Value)> {
    let mut links: Vec<_> = section
        .get(node)
        .and_then(|n| n.get("links"))
        .and_then(serde_json::Value::as_object)
        .map(|links| links.iter().collect())
        .unwrap_or_default();
    links.sort_by(|a, b| a.0.cmp(b.0));
    links
}

/// Plan the construction of a JSON topology (`{"routers": {...}, "switches": {...}}`)
///
/// Routers are created in order of the first number in their name, then
/// switches likewise. Router-to-router links are wired once, from the
/// lexicographically smaller router, with per-router interface counters
/// shared with the switch links that follow.
pub fn json_plan(topo: &serde_json::Value) -> Result<JsonPlan, String> {
    let empty = serde_json::Value::Object(serde_json::Map::new());
    let routers = topo.get("routers").unwrap_or(&empty);
    let switches = topo.get("switches").unwrap_or(&empty);

    let mut router_names: Vec<String> = routers
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    router_names.sort();
    let mut switch_names: Vec<String> = switches
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    switch_names.sort();

    let mut plan = JsonPlan {
        routers: router_names.clone(),
        switches: switch_names.clone(),
        links: Vec::new(),
    };
    plan.routers.sort_by_key(|name| first_number(name));
    plan.switches.sort_by_key(|name| first_number(name));

    let mut next_if: HashMap<String, usize> = router_names.iter().map(|r| (r.clone(), 0)).collect();
    let mut pending = router_names.clone();

    for current in &router_names {
        pending.retain(|r| r != current);
        for (dest_link, data) in links_of(routers, current) {
            if data.get("type").and_then(serde_json::Value::as_str) == Some("loopback") {
                continue;
            }
            let (dest, back_link) = match dest_link.split_once('-') {
                Some((dest, rest)) => (dest.to_string(), format!("{}-{}", current, rest)),
                None => (dest_link.clone(), current.clone()),
            };
            if !pending.contains(&dest) {
                continue;
            }
            let has_back_link = links_of(routers, &dest).iter().any(|(name, _)| **name == back_link);
            if !has_back_link {
                return Err(format!("router {} has no link '{}'", dest, back_link));
            }
            let from_n = next_if.get(current).copied().unwrap_or(0);
            let to_n = next_if.get(&dest).copied().unwrap_or(0);
            plan.links.push(PlannedLink {
                from: current.clone(),
                to: dest.clone(),
                from_if: format!("{}-{}-eth{}", current, dest, from_n),
                to_if: format!("{}-{}-eth{}", dest, current, to_n),
            });
            next_if.insert(current.clone(), from_n + 1);
            next_if.insert(dest, to_n + 1);
        }
    }

    for switch in &switch_names {
        for (dest_link, data) in links_of(switches, switch) {
            let router = match data.get("dst_node").and_then(serde_json::Value::as_str) {
                Some(node) => node.to_string(),
                None => dest_link
                    .split_once('-')
                    .map(|(r, _)| r.to_string())
                    .unwrap_or_else(|| dest_link.clone()),
            };
            let Some(n) = next_if.get(&router).copied() else {
                continue;
            };
            plan.links.push(PlannedLink {
                from: switch.clone(),
                to: router.clone(),
                from_if: format!("{}-{}-eth{}", switch, router, n),
                to_if: format!("{}-{}-eth{}", router, switch, n),
            });
            next_if.insert(router, n + 1);
        }
    }
    Ok(plan)
}

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::dict(Dict::from_pairs(
            map.iter().map(|(k, v)| (Value::str(k), json_to_value(v))),
        )),
    }
}

pub fn value_to_json(value: &Value) -> Result<serde_json::Value, String> {
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) | Value::Set(items) => serde_json::Value::Array(
            items
                .borrow()
                .iter()
                .map(value_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect::<Result<_, _>>()?)
        }
        Value::Dict(dict) => {
            let mut map = serde_json::Map::new();
            for (k, v) in dict.borrow().iter() {
                let key = match k {
                    Value::Str(s) => s.to_string(),
                    Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::None => k.repr(),
                    other => return Err(format!("keys must be str, not {}", other.type_name())),
                };
                map.insert(key, value_to_json(v)?);
            }
            serde_json::Value::Object(map)
        }
        other => {
            return Err(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            ))
        }
    })
}

// ---- os, os.path and subprocess ----------------------------------------

fn string_args(interp: &mut Interpreter, args: &[Value]) -> Exec<Vec<String>> {
    args.iter().map(|a| interp.to_str(a)).collect()
}

fn path_join(parts: &[String]) -> String {
    let mut out = String::new();
    for part in parts {
        if part.starts_with('/') {
            out = part.clone();
        } else if out.is_empty() || out.ends_with('/') {
            out.push_str(part);
        } else {
            out.push('/');
            out.push_str(part);
        }
    }
    out
}

fn path_split(path: &str) -> (String, String) {
    let cut = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (head, tail) = path.split_at(cut);
    let trimmed = head.trim_end_matches('/');
    let head = if trimmed.is_empty() { head } else { trimmed };
    (head.to_string(), tail.to_string())
}

fn path_splitext(path: &str) -> (String, String) {
    let base_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let base = &path[base_start..];
    let leading = base.len() - base.trim_start_matches('.').len();
    match base[leading..].rfind('.') {
        Some(dot) => {
            let at = base_start + leading + dot;
            (path[..at].to_string(), path[at..].to_string())
        }
        None => (path.to_string(), String::new()),
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn absolute_path(interp: &Interpreter, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&path_join(&[interp.source_dir().to_string(), path.to_string()]))
    }
}

fn os_path(interp: &mut Interpreter, name: &str, args: &[Value]) -> Exec<Value> {
    let parts = string_args(interp, args)?;
    let first = parts.first().cloned().unwrap_or_default();
    let pair = |(a, b): (String, String)| Value::tuple(vec![Value::str(a), Value::str(b)]);
    Ok(match name {
        "os.path.join" => Value::str(path_join(&parts)),
        "os.path.dirname" => Value::str(path_split(&first).0),
        "os.path.basename" => Value::str(path_split(&first).1),
        "os.path.split" => pair(path_split(&first)),
        "os.path.splitext" => pair(path_splitext(&first)),
        "os.path.normpath" => Value::str(normalize_path(&first)),
        "os.path.abspath" | "os.path.realpath" => Value::str(absolute_path(interp, &first)),
        "os.path.expanduser" => match first.strip_prefix('~') {
            Some(rest) => Value::str(format!("/root{}", rest)),
            None => Value::str(first),
        },
        "os.path.exists" | "os.path.isdir" | "os.path.isfile" => {
            let path = absolute_path(interp, &first);
            Value::Bool(interp.env().path_exists(&path))
        }
        _ => Value::Inert,
    })
}

fn os_function(interp: &mut Interpreter, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Exec<Value> {
    match name {
        "os.system" => {
            let command = required(interp, args, kwargs, 0, "command", name)?;
            let command = command_line(interp, &command)?;
            Ok(Value::Int(interp.env().run_command(&command).code as i64))
        }
        "os.makedirs" | "os.mkdir" => {
            let path = required(interp, args, kwargs, 0, "name", name)?;
            let path = interp.to_str(&path)?;
            let path = absolute_path(interp, &path);
            if interp.env().make_dirs(&path) {
                Ok(Value::None)
            } else {
                Err(interp.raise("OSError", format!("cannot create directory '{}'", path)))
            }
        }
        "os.getuid" | "os.geteuid" => Ok(Value::Int(0)),
        "os.getpid" => Ok(Value::Int(1)),
        "os.getcwd" => Ok(Value::str(interp.source_dir())),
        "os.getenv" => Ok(arg(args, kwargs, 1, "default").unwrap_or(Value::None)),
        _ => Ok(Value::None),
    }
}

fn command_line(interp: &mut Interpreter, command: &Value) -> Exec<String> {
    match command {
        Value::Str(s) => Ok(s.to_string()),
        Value::List(_) | Value::Tuple(_) => {
            let words = interp.iterate(command)?;
            Ok(string_args(interp, &words)?.join(" "))
        }
        other => interp.to_str(other),
    }
}

fn subprocess(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: &[(String, Value)]) -> Exec<Value> {
    match name {
        "subprocess.Popen.result" => Ok(Value::tuple(args.into_iter().take(2).collect())),
        "subprocess.Popen.returncode" => Ok(args.into_iter().next().unwrap_or(Value::Int(0))),
        _ => {
            let command = required(interp, &args, kwargs, 0, "args", name)?;
            let line = command_line(interp, &command)?;
            let status = interp.env().run_command(&line);
            let check = kwargs.iter().any(|(k, v)| k == "check" && v.truthy());
            let failed = !status.is_success() && (check || matches!(name, "subprocess.check_call" | "subprocess.check_output"));
            if failed {
                return Err(Unwind::Raise(interp.new_exception(
                    "CalledProcessError",
                    vec![Value::Int(status.code as i64), Value::str(&line)],
                )));
            }
            Ok(match name {
                "subprocess.check_call" | "subprocess.call" => Value::Int(status.code as i64),
                "subprocess.check_output" | "subprocess.getoutput" => Value::str(&status.stdout),
                "subprocess.run" => Value::native(Native::namespace(
                    "CompletedProcess",
                    vec![
                        ("args", command),
                        ("returncode", Value::Int(status.code as i64)),
                        ("stdout", Value::str(&status.stdout)),
                        ("stderr", Value::str(&status.stderr)),
                    ],
                )),
                _ => {
                    let result = Value::Partial(Rc::new(Partial {
                        func: Value::Builtin("subprocess.Popen.result"),
                        args: vec![Value::str(&status.stdout), Value::str(&status.stderr)],
                        kwargs: Vec::new(),
                    }));
                    let returncode = Value::Partial(Rc::new(Partial {
                        func: Value::Builtin("subprocess.Popen.returncode"),
                        args: vec![Value::Int(status.code as i64)],
                        kwargs: Vec::new(),
                    }));
                    Value::native(Native::namespace(
                        "Popen",
                        vec![
                            ("args", command),
                            ("pid", Value::Int(1)),
                            ("returncode", Value::Int(status.code as i64)),
                            ("communicate", result),
                            ("wait", returncode.clone()),
                            ("poll", returncode),
                        ],
                    ))
                }
            })
        }
    }
}

// ---- framework objects -------------------------------------------------

/// Request object handed to fixtures
pub fn fixture_request(module: Rc<ModuleObj>) -> Value {
    Value::native(Native::namespace(
        "FixtureRequest",
        vec![
            ("module", Value::Module(module)),
            ("param", Value::Int(4)),
            ("config", Value::native(Native::Config)),
            ("fixturename", Value::str("tgen")),
            ("addfinalizer", Value::Inert),
        ],
    ))
}

pub fn is_instance(object: &Value, class: &str) -> bool {
    let Value::Native(native) = object else {
        return false;
    };
    match native.as_ref() {
        Native::Topogen(_) => class == "lib.topogen.Topogen",
        Native::Gear(tgen, name) => class.starts_with("lib.topogen.Topo")
            && tgen.gear_kind(name).is_some_and(|kind| kind.is_a(class)),
        Native::Logger(_) => class == "logging.Logger",
        _ => false,
    }
}

pub fn native_attr(interp: &mut Interpreter, object: &Value, native: &Rc<Native>, name: &str) -> Exec<Value> {
    match native.as_ref() {
        Native::Topogen(tgen) => {
            if let Some(value) = tgen.attrs.borrow().get(name) {
                return Ok(value.clone());
            }
            Ok(match name {
                "gears" => Value::native(Native::Gears(tgen.clone())),
                "modname" => Value::str(&tgen.modname),
                "logdir" => Value::str(&tgen.logdir),
                "json_topo" => {
                    return Err(interp.raise(
                        "AttributeError",
                        "'Topogen' object has no attribute 'json_topo'",
                    ))
                }
                _ if TOPOGEN_METHODS.contains(&name) => Value::method(object.clone(), name),
                _ => Value::Inert,
            })
        }
        Native::Gear(tgen, gear) => {
            if let Some(value) = tgen.gear_attr(gear, name) {
                return Ok(value);
            }
            Ok(match name {
                "name" => Value::str(gear),
                "tgen" => Value::native(Native::Topogen(tgen.clone())),
                "linkn" => Value::Int(tgen.gear_linkn(gear) as i64),
                "logdir" => Value::str(format!("{}/{}", tgen.logdir, gear)),
                "links" => Value::dict(Dict::from_pairs(tgen.gear_links(gear).into_iter().map(
                    |(myif, peer, peerif)| {
                        (
                            Value::str(myif),
                            Value::tuple(vec![gear_value(tgen, peer), Value::str(peerif)]),
                        )
                    },
                ))),
                _ if GEAR_METHODS.contains(&name) => Value::method(object.clone(), name),
                _ => Value::Inert,
            })
        }
        Native::Gears(_) => match name {
            "keys" | "values" | "items" | "get" => Ok(Value::method(object.clone(), name)),
            _ => Err(interp.raise(
                "AttributeError",
                format!("'dict' object has no attribute '{}'", name),
            )),
        },
        Native::Logger(_) => Ok(if LOGGER_LEVELS.contains(&name) || name == "log" {
            Value::method(object.clone(), name)
        } else {
            Value::Inert
        }),
        Native::Config => Ok(match name {
            "getoption" | "getini" => Value::method(object.clone(), name),
            "option" => {
                let env = interp.env();
                let mut attrs = Vec::new();
                for option in ["rundir", "capture"] {
                    if let Some(value) = env.option(option) {
                        attrs.push((option, Value::str(value)));
                    }
                }
                Value::native(Native::namespace("option", attrs))
            }
            _ => Value::Inert,
        }),
        Native::File(path, _) => Ok(match name {
            "name" => Value::str(path),
            _ => Value::method(object.clone(), name),
        }),
        Native::Namespace(_, attrs) => Ok(attrs.borrow().get(name).cloned().unwrap_or(Value::Inert)),
        Native::StaticMethod(inner) | Native::ClassMethod(inner) => Ok(match name {
            "__func__" => inner.clone(),
            _ => Value::Inert,
        }),
        Native::Super(..) => Ok(Value::Inert),
    }
}

pub fn set_native_attr(interp: &mut Interpreter, native: &Rc<Native>, name: &str, value: Value) -> Exec<()> {
    match native.as_ref() {
        Native::Topogen(tgen) => {
            tgen.attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Native::Gear(tgen, gear) => {
            tgen.set_gear_attr(gear, name, value);
            Ok(())
        }
        Native::Namespace(_, attrs) => {
            attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Native::Logger(_) | Native::Config => Ok(()),
        other => Err(interp.raise(
            "AttributeError",
            format!("'{}' object attribute '{}' is read-only", other.type_name(), name),
        )),
    }
}

pub fn native_item(interp: &mut Interpreter, native: &Rc<Native>, index: &Value) -> Exec<Value> {
    match native.as_ref() {
        Native::Gears(tgen) => {
            let found = index
                .as_str()
                .filter(|name| tgen.gear_kind(name).is_some())
                .map(str::to_string);
            match found {
                Some(name) => Ok(gear_value(tgen, name)),
                None => Err(Unwind::Raise(interp.new_exception("KeyError", vec![index.clone()]))),
            }
        }
        Native::Namespace(_, attrs) => match index.as_str().and_then(|k| attrs.borrow().get(k).cloned()) {
            Some(value) => Ok(value),
            None => Err(Unwind::Raise(interp.new_exception("KeyError", vec![index.clone()]))),
        },
        other => Err(interp.raise(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

pub fn set_native_item(interp: &mut Interpreter, native: &Rc<Native>, index: Value, value: Value) -> Exec<()> {
    match native.as_ref() {
        Native::Namespace(_, attrs) => {
            let key = interp.to_str(&index)?;
            attrs.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(interp.raise(
            "TypeError",
            format!("'{}' object does not support item assignment", other.type_name()),
        )),
    }
}

pub fn native_iter(interp: &mut Interpreter, native: &Rc<Native>) -> Exec<Vec<Value>> {
    match native.as_ref() {
        Native::Gears(tgen) => Ok(tgen.gear_names().into_iter().map(Value::str).collect()),
        Native::File(_, content) => Ok(content.split_inclusive('\n').map(Value::str).collect()),
        other => Err(interp.raise(
            "TypeError",
            format!("'{}' object is not iterable", other.type_name()),
        )),
    }
}

pub fn native_contains(interp: &mut Interpreter, native: &Rc<Native>, item: &Value) -> Exec<bool> {
    match native.as_ref() {
        Native::Gears(tgen) => Ok(item.as_str().is_some_and(|name| tgen.gear_kind(name).is_some())),
        Native::Namespace(_, attrs) => Ok(item.as_str().is_some_and(|k| attrs.borrow().contains_key(k))),
        Native::File(..) => {
            let lines = native_iter(interp, native)?;
            Ok(lines.iter().any(|line| py_eq(line, item)))
        }
        other => Err(interp.raise(
            "TypeError",
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    native: &Rc<Native>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    match native.as_ref() {
        Native::Topogen(tgen) => topogen_method(interp, tgen, name, &args, &kwargs),
        Native::Gear(tgen, gear) => gear_method(interp, tgen, gear, name, &args, &kwargs),
        Native::Gears(tgen) => match name {
            "keys" => Ok(Value::list(tgen.gear_names().into_iter().map(Value::str).collect())),
            "values" => Ok(Value::list(
                tgen.gear_names()
                    .into_iter()
                    .map(|n| gear_value(tgen, n))
                    .collect(),
            )),
            "items" => Ok(Value::list(
                tgen.gear_names()
                    .into_iter()
                    .map(|n| Value::tuple(vec![Value::str(&n), gear_value(tgen, n)]))
                    .collect(),
            )),
            "get" => {
                let key = required(interp, &args, &kwargs, 0, "key", name)?;
                match key.as_str().filter(|k| tgen.gear_kind(k).is_some()) {
                    Some(k) => Ok(gear_value(tgen, k.to_string())),
                    None => Ok(arg(&args, &kwargs, 1, "default").unwrap_or(Value::None)),
                }
            }
            _ => Err(interp.raise("AttributeError", format!("'dict' object has no attribute '{}'", name))),
        },
        Native::Logger(logger) => {
            let (level, args) = match name {
                "log" => {
                    let level = args.first().and_then(Value::as_int).unwrap_or(20);
                    let level = match level {
                        l if l >= 50 => "critical",
                        l if l >= 40 => "error",
                        l if l >= 30 => "warning",
                        l if l >= 20 => "info",
                        _ => "debug",
                    };
                    (level, args.into_iter().skip(1).collect())
                }
                "warn" => ("warning", args),
                "exception" => ("error", args),
                other => (other, args),
            };
            log_record(interp, logger, level, &args)?;
            Ok(Value::None)
        }
        Native::Config => match name {
            "getoption" => {
                let option = required(interp, &args, &kwargs, 0, "name", name)?;
                let option = interp.to_str(&option)?;
                match interp.env().option(&option) {
                    Some(value) => Ok(Value::str(value)),
                    None => Ok(arg(&args, &kwargs, 1, "default").unwrap_or(Value::None)),
                }
            }
            _ => Ok(Value::None),
        },
        Native::File(_, content) => match name {
            "read" => Ok(Value::str(content)),
            "readlines" => Ok(Value::list(content.split_inclusive('\n').map(Value::str).collect())),
            "readline" => Ok(Value::str(content.split_inclusive('\n').next().unwrap_or(""))),
            "write" => Ok(Value::Int(
                args.first().and_then(Value::as_str).map(|s| s.chars().count()).unwrap_or(0) as i64,
            )),
            "__enter__" => Ok(receiver.clone()),
            _ => Ok(Value::None),
        },
        Native::Namespace(_, attrs) => {
            let method = attrs.borrow().get(name).cloned();
            match method {
                Some(method) => interp.call(&method, args, kwargs),
                None => Ok(Value::Inert),
            }
        }
        other => Err(interp.raise(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn log_record(interp: &mut Interpreter, logger: &str, level: &str, args: &[Value]) -> Exec<()> {
    let Some(message) = args.first() else {
        return Ok(());
    };
    let mut text = interp.to_str(message)?;
    if let (Value::Str(fmt), true) = (message, args.len() > 1) {
        if let Ok(formatted) = format::percent_format(interp, fmt, &Value::tuple(args[1..].to_vec())) {
            text = formatted;
        }
    }
    interp.env().log(logger, level, &text);
    Ok(())
}

fn topogen_method(
    interp: &mut Interpreter,
    tgen: &Rc<Topogen>,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Exec<Value> {
    let kind = match name {
        "add_router" => Some(GearKind::Router),
        "add_switch" => Some(GearKind::Switch),
        "add_host" => Some(GearKind::Host),
        "add_exabgp_peer" => Some(GearKind::ExaBgpPeer),
        "add_bmp_server" => Some(GearKind::BmpServer),
        _ => None,
    };
    if let Some(kind) = kind {
        let requested = optional_string(interp, arg(args, kwargs, 0, "name"))?;
        let gear = tgen.add_gear(interp, requested, kind)?;
        return Ok(gear_value(tgen, gear));
    }

    match name {
        "add_link" => {
            let node1 = required(interp, args, kwargs, 0, "node1", name)?;
            let node2 = required(interp, args, kwargs, 1, "node2", name)?;
            let a = gear_name(&node1, tgen).ok_or_else(|| interp.raise("ValueError", "invalid node1 type"))?;
            let b = gear_name(&node2, tgen).ok_or_else(|| interp.raise("ValueError", "invalid node2 type"))?;
            let if1 = optional_string(interp, arg(args, kwargs, 2, "ifname1"))?;
            let if2 = optional_string(interp, arg(args, kwargs, 3, "ifname2"))?;
            tgen.add_link(interp, &a, &b, if1, if2)?;
            Ok(Value::None)
        }
        "routers" => Ok(gear_dict(tgen, |gear| is_instance(gear, "lib.topogen.TopoRouter"))),
        "get_gears" => match arg(args, kwargs, 0, "geartype") {
            Some(Value::Builtin(class)) => Ok(gear_dict(tgen, |gear| is_instance(gear, class))),
            _ => Ok(gear_dict(tgen, |_| true)),
        },
        "routers_have_failure" | "is_memleak_enabled" => Ok(Value::Bool(false)),
        _ => Ok(Value::None),
    }
}

fn gear_method(
    interp: &mut Interpreter,
    tgen: &Rc<Topogen>,
    gear: &str,
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Exec<Value> {
    match name {
        "add_link" => {
            let node = required(interp, args, kwargs, 0, "node", name)?;
            let peer = gear_name(&node, tgen).ok_or_else(|| interp.raise("ValueError", "invalid node type"))?;
            let myif = optional_string(interp, arg(args, kwargs, 1, "myif"))?;
            let nodeif = optional_string(interp, arg(args, kwargs, 2, "nodeif"))?;
            tgen.add_link(interp, gear, &peer, myif, nodeif)?;
            Ok(Value::None)
        }
        "new_link" => Ok(Value::str(tgen.new_link(gear))),
        "run" | "cmd" | "cmd_raises" => {
            let command = required(interp, args, kwargs, 0, "command", name)?;
            let line = command_line(interp, &command)?;
            Ok(Value::str(interp.env().run_command(&line).stdout))
        }
        "vtysh_cmd" | "vtysh_multicmd" => Ok(Value::str("")),
        _ => Ok(Value::None),
    }
}

#[cfg(test)]
mod tests {
    use super::super::lower::parse_module;
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::runtime::{
        CaptureObserver, CapturePolicy, ConstructionObserver, ExecutionEnvironment,
        MockExecutionEnvironment, RuntimeSettings, SimulatedRuntime,
    };
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    struct Run {
        interp: Interpreter,
        observer: Rc<RefCell<CaptureObserver>>,
        result: Exec<Rc<ModuleObj>>,
    }

    fn run_with(env: Rc<dyn ExecutionEnvironment>, src: &str) -> Run {
        let observer = Rc::new(RefCell::new(CaptureObserver::new(CapturePolicy::Observe)));
        let shared: Rc<RefCell<dyn ConstructionObserver>> = observer.clone();
        let mut interp = Interpreter::new(env, shared, Path::new("/mock/demo/test_demo.py"));
        let module = parse_module(src).unwrap();
        let result = interp.exec_module("test_demo", &module);
        Run { interp, observer, result }
    }

    fn simulated(fs: Arc<MockFileSystem>) -> Rc<dyn ExecutionEnvironment> {
        Rc::new(SimulatedRuntime::new(fs, RuntimeSettings::with_rundir("/mock/rundir")))
    }

    fn run(src: &str) -> Run {
        run_with(simulated(Arc::new(MockFileSystem::new())), src)
    }

    fn built(src: &str) -> Graph {
        let run = run(src);
        if let Err(Unwind::Raise(exc)) = &run.result {
            panic!("raised {}", run.interp.describe(exc));
        }
        let graph = run.observer.borrow().captured().cloned();
        graph.expect("topology built")
    }

    fn peers(graph: &Graph, node: &str) -> Vec<(String, String, String)> {
        graph
            .node(node)
            .unwrap()
            .interfaces()
            .iter()
            .map(|(local, peer)| (local.clone(), peer.node.clone(), peer.interface.clone()))
            .collect()
    }

    #[test]
    fn test_callable_topodef_builds_graph() {
        let graph = built(
            "\
from lib.topogen import Topogen

def build_topo(tgen):
    for i in range(1, 4):
        tgen.add_router('r{}'.format(i))
    s1 = tgen.add_switch('s1')
    for name in ['r1', 'r2', 'r3']:
        s1.add_link(tgen.gears[name])

tgen = Topogen(build_topo, 'test_demo')
",
        );
        assert_eq!(graph.router_count(), 3);
        assert_eq!(graph.switch_count(), 1);
        assert_eq!(
            peers(&graph, "s1"),
            vec![
                ("s1-eth0".to_string(), "r1".to_string(), "r1-eth0".to_string()),
                ("s1-eth1".to_string(), "r2".to_string(), "r2-eth0".to_string()),
                ("s1-eth2".to_string(), "r3".to_string(), "r3-eth0".to_string()),
            ]
        );
    }

    #[test]
    fn test_dict_topodef() {
        let graph = built(
            "\
from lib.topogen import Topogen
topodef = {'s2': 'r3:eth9', 's1': ('r1', 'r2'), 's10': ('r1',)}
tgen = Topogen(topodef, 'test_demo')
",
        );
        assert_eq!(graph.router_count(), 3);
        assert_eq!(graph.switch_count(), 3);
        assert_eq!(
            peers(&graph, "s2"),
            vec![("s2-r3-eth0".to_string(), "r3".to_string(), "eth9".to_string())]
        );
        // s1 precedes s10 in natural order, so r1 gets eth0 on s1
        assert_eq!(
            peers(&graph, "r1"),
            vec![
                ("r1-eth0".to_string(), "s1".to_string(), "s1-r1-eth0".to_string()),
                ("r1-eth1".to_string(), "s10".to_string(), "s10-r1-eth0".to_string()),
            ]
        );
    }

    #[test]
    fn test_auto_names_and_duplicates() {
        let run = run(
            "\
from lib.topogen import Topogen, get_topogen

def build(tgen):
    tgen.add_router()
    tgen.add_router('core')
    tgen.add_router()
    tgen.add_switch()

Topogen(build, 'test_demo')
names = sorted(get_topogen().gears.keys())
try:
    get_topogen().add_router('core')
    dup = 'none'
except KeyError as e:
    dup = 'KeyError'
",
        );
        let module = run.result.ok().unwrap();
        assert_eq!(module.get("names").unwrap().repr(), "['core', 'r1', 'r3', 's1']");
        assert_eq!(module.get("dup").unwrap().repr(), "'KeyError'");
    }

    #[test]
    fn test_hosts_stay_out_of_graph() {
        let graph = built(
            "\
from lib.topogen import Topogen

def build_topo(tgen):
    r1 = tgen.add_router('r1')
    peer = tgen.add_exabgp_peer('peer1', ip='10.0.0.2', defaultRoute='via 10.0.0.1')
    s1 = tgen.add_switch('s1')
    s1.add_link(r1)
    s1.add_link(peer)

Topogen(build_topo, 'test_demo')
",
        );
        assert!(graph.contains("r1"));
        assert!(!graph.contains("peer1"));
        assert_eq!(graph.links().len(), 1);
    }

    #[test]
    fn test_add_link_rejects_non_gears() {
        let run = run(
            "\
from lib.topogen import Topogen

def build_topo(tgen):
    tgen.add_router('r1')
    tgen.add_link(tgen.gears['r1'], 'r2')

Topogen(build_topo, 'test_demo')
",
        );
        match run.result {
            Err(Unwind::Raise(exc)) => {
                assert_eq!(run.interp.describe(&exc), "ValueError: invalid node2 type")
            }
            _ => panic!("expected ValueError"),
        }
    }

    #[test]
    fn test_rejected_link_leaves_no_half() {
        let graph = built(
            "\
from lib.topogen import Topogen

def build_topo(tgen):
    r1 = tgen.add_router('r1')
    r2 = tgen.add_router('r2')
    r3 = tgen.add_router('r3')
    tgen.add_link(r1, r2, 'eth-a', 'eth-b')
    try:
        tgen.add_link(r3, r2, 'eth-c', 'eth-b')
    except KeyError:
        pass
    tgen.add_link(r3, r1, 'eth-c', 'eth-d')

Topogen(build_topo, 'test_demo')
",
        );
        assert_eq!(
            peers(&graph, "r3"),
            vec![("eth-c".to_string(), "r1".to_string(), "eth-d".to_string())]
        );
        assert_eq!(
            peers(&graph, "r2"),
            vec![("eth-b".to_string(), "r1".to_string(), "eth-a".to_string())]
        );
        assert_eq!(graph.links().len(), 2);
    }

    #[test]
    fn test_stop_after_first_halts_routine() {
        let fs = Arc::new(MockFileSystem::new());
        let observer = Rc::new(RefCell::new(CaptureObserver::new(CapturePolicy::StopAfterFirst)));
        let shared: Rc<RefCell<dyn ConstructionObserver>> = observer.clone();
        let mut interp = Interpreter::new(simulated(fs), shared, Path::new("/mock/demo/test_demo.py"));
        let module = parse_module(
            "\
from lib.topogen import Topogen
after = 'unset'
try:
    Topogen({'s1': ('r1', 'r2')}, 'test_demo')
    after = 'ran'
except BaseException:
    after = 'caught'
",
        )
        .unwrap();
        assert!(matches!(interp.exec_module("test_demo", &module), Err(Unwind::Halt)));
        assert_eq!(observer.borrow().captured().unwrap().router_count(), 2);
        assert_eq!(
            interp.module("test_demo").unwrap().get("after").unwrap().repr(),
            "'unset'"
        );
    }

    #[test]
    fn test_startup_goes_through_environment() {
        let mut env = MockExecutionEnvironment::new();
        env.expect_has_privileges().times(1).return_const(true);
        env.expect_adjust_limits().times(2).return_const(());
        env.expect_module_present().times(2).return_const(true);
        env.expect_option()
            .withf(|name| name == "rundir")
            .return_const(Some("/tmp/run".to_string()));
        env.expect_run_command()
            .withf(|cmd| cmd == "mkdir -p /tmp/run/test_demo && chmod 1777 /tmp/run/test_demo")
            .times(1)
            .returning(|_| crate::runtime::CommandStatus::success());
        env.expect_log().returning(|_, _, _| ());

        let run = run_with(
            Rc::new(env),
            "\
from lib.topogen import Topogen
tgen = Topogen({'s1': 'r1'}, 'test_demo')
logdir = tgen.logdir
modname = tgen.modname
",
        );
        let module = run.result.ok().unwrap();
        assert_eq!(module.get("logdir").unwrap().repr(), "'/tmp/run/test_demo'");
        assert_eq!(module.get("modname").unwrap().repr(), "'test_demo'");
    }

    #[test]
    fn test_missing_privileges_skip() {
        let mut env = MockExecutionEnvironment::new();
        env.expect_has_privileges().return_const(false);
        let run = run_with(
            Rc::new(env),
            "from lib.topogen import Topogen\nTopogen({'s1': 'r1'}, 'test_demo')\n",
        );
        match run.result {
            Err(Unwind::Raise(exc)) => assert!(run.interp.is_exception_of(&exc, "Skipped")),
            _ => panic!("expected a skip"),
        }
    }

    #[test]
    fn test_json_topodef_file() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file(
            "demo/demo.json",
            &json!({
                "routers": {
                    "r1": {"links": {"lo": {"type": "loopback"}, "r2": {}}},
                    "r2": {"links": {"r1": {}, "s1": {}}}
                },
                "switches": {"s1": {"links": {"r2": {}}}}
            })
            .to_string(),
        );
        let run = run_with(
            simulated(fs),
            "\
import os
from lib.topogen import Topogen
CWD = os.path.dirname(os.path.realpath(__file__))
tgen = Topogen('{}/demo.json'.format(CWD), 'test_demo')
routers = sorted(tgen.json_topo['routers'])
",
        );
        let module = run.result.ok().unwrap();
        assert_eq!(module.get("routers").unwrap().repr(), "['r1', 'r2']");
        let graph = run.observer.borrow().captured().cloned().unwrap();
        assert_eq!(
            peers(&graph, "r2"),
            vec![
                ("r2-r1-eth0".to_string(), "r1".to_string(), "r1-r2-eth0".to_string()),
                ("r2-s1-eth1".to_string(), "s1".to_string(), "s1-r2-eth1".to_string()),
            ]
        );
    }

    #[test]
    fn test_json_plan_link_naming() {
        let plan = json_plan(&json!({
            "routers": {
                "r10": {"links": {"r2": {}}},
                "r2": {"links": {"r10": {}, "r3-link1": {}, "r3-link2": {}}},
                "r3": {"links": {"r2-link1": {}, "r2-link2": {}}}
            },
            "switches": {"s1": {"links": {"r3": {"dst_node": "r3"}}}}
        }))
        .unwrap();

        assert_eq!(plan.routers, vec!["r2", "r3", "r10"]);
        let names: Vec<(&str, &str)> = plan
            .links
            .iter()
            .map(|l| (l.from_if.as_str(), l.to_if.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("r10-r2-eth0", "r2-r10-eth0"),
                ("r2-r3-eth1", "r3-r2-eth0"),
                ("r2-r3-eth2", "r3-r2-eth1"),
                ("s1-r3-eth2", "r3-s1-eth2"),
            ]
        );
    }

    #[test]
    fn test_json_plan_missing_back_link() {
        let err = json_plan(&json!({
            "routers": {"r1": {"links": {"r2": {}}}, "r2": {"links": {}}}
        }))
        .unwrap_err();
        assert!(err.contains("r2"));
    }

    #[test]
    fn test_natural_key_orders_numbers() {
        let mut names = vec!["s10", "s2", "r1", "s1"];
        names.sort_by_key(|n| natural_key(n));
        assert_eq!(names, vec!["r1", "s1", "s2", "s10"]);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(path_join(&["/a".into(), "b".into(), "/c".into(), "d".into()]), "/c/d");
        assert_eq!(path_split("/a/b/c.py"), ("/a/b".to_string(), "c.py".to_string()));
        assert_eq!(path_split("/c.py"), ("/".to_string(), "c.py".to_string()));
        assert_eq!(path_splitext("dir/.hidden"), ("dir/.hidden".to_string(), String::new()));
        assert_eq!(path_splitext("a/b.tar.gz"), ("a/b.tar".to_string(), ".gz".to_string()));
        assert_eq!(normalize_path("/a/./b/../c//"), "/a/c");
        assert_eq!(normalize_path("../x/.."), "..");
    }

    #[test]
    fn test_pytest_and_stdlib_stand_ins() {
        let run = run(
            "\
import pytest, subprocess, functools, json, sys
from lib import topotest

@pytest.fixture(scope='module')
def tgen(request):
    return 1

@pytest.mark.parametrize('x', [1, 2])
def test_x(x):
    pass

add = functools.partial(lambda a, b: a + b, 10)
out = subprocess.check_output(['ip', 'link'])
doc = json.loads(json.dumps({'a': [1, 2]}))
version = sys.version_info >= (3, 6)
present = topotest.module_present('mpls-router')
try:
    pytest.skip('no')
except Exception:
    skipped = 'caught'
except BaseException:
    skipped = 'skipped'
total = add(5)
",
        );
        let module = run.result.ok().unwrap();
        assert!(matches!(module.get("tgen"), Some(Value::Function(_))));
        assert_eq!(module.get("total").unwrap().repr(), "15");
        assert_eq!(module.get("out").unwrap().repr(), "''");
        assert_eq!(module.get("doc").unwrap().repr(), "{'a': [1, 2]}");
        assert_eq!(module.get("version").unwrap().repr(), "True");
        assert_eq!(module.get("present").unwrap().repr(), "True");
        assert_eq!(module.get("skipped").unwrap().repr(), "'skipped'");
    }
}
