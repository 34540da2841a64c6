//! Tree-walking evaluator for builder modules
//!
//! Every side effect a module can have leaves through the
//! [`ExecutionEnvironment`] it was given; framework objects report
//! construction progress to the [`ConstructionObserver`], whose `Stop`
//! answer unwinds the whole call stack as [`Unwind::Halt`]. A halt cannot
//! be caught by `try`/`except` and skips `finally` blocks.

use super::ast::*;
use super::builtins;
use super::format;
use super::framework::{self, Topogen};
use super::value::*;
use crate::runtime::{ConstructionObserver, ExecutionEnvironment, Flow};
use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, trace};

/// Python call depth at which a `RecursionError` is raised
pub const MAX_CALL_DEPTH: usize = 200;

/// Iterations after which a `while` loop is considered runaway
pub const MAX_LOOP_ITERATIONS: usize = 1_000_000;

/// Largest string (in bytes) or sequence a single operation may build
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

/// Non-local exits out of statement execution
pub enum Unwind {
    Return(Value),
    Break,
    Continue,
    Raise(Value),
    /// The construction observer asked to stop the routine
    Halt,
    /// First `yield` of a generator advanced one step
    Yield(Value),
}

pub type Exec<T> = Result<T, Unwind>;

/// Resolved `start:stop:step`; the step is never zero
type SliceArgs = (Option<i64>, Option<i64>, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Module,
    Function,
    Class,
}

struct Frame {
    locals: Scope,
    /// Enclosing function scopes, innermost first
    closure: Vec<Scope>,
    globals: Rc<ModuleObj>,
    kind: FrameKind,
    declared_global: HashSet<String>,
    declared_nonlocal: HashSet<String>,
    owner: Option<Rc<Class>>,
    receiver: Option<Value>,
}

impl Frame {
    fn module(module: &Rc<ModuleObj>) -> Self {
        Self {
            locals: module.dict.clone(),
            closure: Vec::new(),
            globals: module.clone(),
            kind: FrameKind::Module,
            declared_global: HashSet::new(),
            declared_nonlocal: HashSet::new(),
            owner: None,
            receiver: None,
        }
    }

    /// Scopes a function or comprehension created in this frame can see
    fn visible_scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(self.closure.len() + 1);
        if self.kind == FrameKind::Function {
            scopes.push(self.locals.clone());
        }
        scopes.extend(self.closure.iter().cloned());
        scopes
    }

    fn nested(&self, kind: FrameKind) -> Self {
        Self {
            locals: new_scope(),
            closure: self.visible_scopes(),
            globals: self.globals.clone(),
            kind,
            declared_global: HashSet::new(),
            declared_nonlocal: HashSet::new(),
            owner: self.owner.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

enum YieldMode {
    Collect(Vec<Value>),
    OneStep,
}

enum CompOut<'a> {
    Items(&'a Expr, Vec<Value>),
    Pairs(&'a Expr, &'a Expr, Dict),
}

pub struct Interpreter {
    env: Rc<dyn ExecutionEnvironment>,
    observer: Rc<RefCell<dyn ConstructionObserver>>,
    modules: HashMap<String, Rc<ModuleObj>>,
    builtins: Scope,
    exceptions: HashMap<String, Rc<Class>>,
    current_topogen: Option<Rc<Topogen>>,
    source_path: String,
    source_dir: String,
    depth: usize,
    yield_modes: Vec<YieldMode>,
    handling: Vec<Value>,
}

impl Interpreter {
    pub fn new(
        env: Rc<dyn ExecutionEnvironment>,
        observer: Rc<RefCell<dyn ConstructionObserver>>,
        source_path: &Path,
    ) -> Self {
        let exceptions = builtins::exception_classes();
        let builtins = builtins::scope(&exceptions);
        let source_dir = source_path
            .parent()
            .map(|p| p.display().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        Self {
            env,
            observer,
            modules: HashMap::new(),
            builtins,
            exceptions,
            current_topogen: None,
            source_path: source_path.display().to_string(),
            source_dir,
            depth: 0,
            yield_modes: Vec::new(),
            handling: Vec::new(),
        }
    }

    pub fn env(&self) -> Rc<dyn ExecutionEnvironment> {
        self.env.clone()
    }

    pub fn observer(&self) -> RefMut<'_, dyn ConstructionObserver> {
        self.observer.borrow_mut()
    }

    /// Turn an observer answer into control flow
    pub fn flow(&self, flow: Flow) -> Exec<()> {
        match flow {
            Flow::Continue => Ok(()),
            Flow::Stop => Err(Unwind::Halt),
        }
    }

    pub fn source_dir(&self) -> &str {
        &self.source_dir
    }

    pub fn current_topogen(&self) -> Option<Rc<Topogen>> {
        self.current_topogen.clone()
    }

    pub fn set_current_topogen(&mut self, tgen: Option<Rc<Topogen>>) {
        self.current_topogen = tgen;
    }

    pub fn module(&self, name: &str) -> Option<Rc<ModuleObj>> {
        self.modules.get(name).cloned()
    }

    /// Execute a parsed source file as module `name`
    pub fn exec_module(&mut self, name: &str, module: &Module) -> Exec<Rc<ModuleObj>> {
        let obj = Rc::new(ModuleObj::new(name, false));
        obj.set("__name__", Value::str(name));
        obj.set("__file__", Value::str(&self.source_path));
        obj.set("__doc__", Value::None);
        self.modules.insert(name.to_string(), obj.clone());
        debug!(module = name, statements = module.body.len(), "Executing module");

        let mut frame = Frame::module(&obj);
        match self.exec_block(&mut frame, &module.body) {
            Ok(()) | Err(Unwind::Return(_) | Unwind::Break | Unwind::Continue) => Ok(obj),
            Err(other) => Err(other),
        }
    }

    // ---- exceptions ----------------------------------------------------

    pub fn exception_class(&self, name: &str) -> Rc<Class> {
        self.exceptions
            .get(name)
            .cloned()
            .unwrap_or_else(|| Rc::new(Class::exception(name, Vec::new())))
    }

    pub fn new_exception(&self, kind: &str, args: Vec<Value>) -> Value {
        let instance = Instance::new(self.exception_class(kind));
        instance
            .attrs
            .borrow_mut()
            .insert("args".to_string(), Value::tuple(args));
        Value::Instance(Rc::new(instance))
    }

    /// Build a raised exception of a builtin type
    pub fn raise(&self, kind: &str, message: impl AsRef<str>) -> Unwind {
        Unwind::Raise(self.new_exception(kind, vec![Value::str(message)]))
    }

    /// Clears per-call bookkeeping left behind by an aborted call
    pub fn recover(&mut self) {
        self.depth = 0;
        self.yield_modes.clear();
        self.handling.clear();
    }

    /// Size of `len` units repeated `times` times; a `MemoryError` past [`MAX_SEQUENCE_LEN`]
    pub fn repeated_len(&self, len: usize, times: i64) -> Exec<usize> {
        let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
        match len.checked_mul(times) {
            Some(total) if total <= MAX_SEQUENCE_LEN => Ok(total),
            _ => Err(self.raise(
                "MemoryError",
                format!("cannot build a sequence of {} x {} items", len, times),
            )),
        }
    }

    /// Rejects padding widths past [`MAX_SEQUENCE_LEN`]
    pub fn check_width(&self, width: usize) -> Exec<usize> {
        if width > MAX_SEQUENCE_LEN {
            return Err(self.raise("MemoryError", format!("width {} is too large", width)));
        }
        Ok(width)
    }

    pub fn is_exception_of(&self, exc: &Value, kind: &str) -> bool {
        match (exc, self.exceptions.get(kind)) {
            (Value::Instance(inst), Some(class)) => inst.class.is_subclass_of(class),
            _ => false,
        }
    }

    /// `Type: message` rendering of a raised value
    pub fn describe(&self, exc: &Value) -> String {
        match exc {
            Value::Instance(inst) if inst.class.is_exception() => {
                let message = exception_message(inst);
                if message.is_empty() {
                    inst.class.name.clone()
                } else {
                    format!("{}: {}", inst.class.name, message)
                }
            }
            other => other.repr(),
        }
    }

    fn raisable(&mut self, value: Value) -> Exec<Value> {
        match &value {
            Value::Class(class) if class.is_exception() => {
                let class = class.clone();
                self.instantiate(&class, Vec::new(), Vec::new())
            }
            Value::Instance(inst) if inst.class.is_exception() => Ok(value),
            other => Err(self.raise(
                "TypeError",
                format!("exceptions must derive from BaseException, not {}", other.type_name()),
            )),
        }
    }

    fn exception_matches(&self, exc: &Value, kind: &Value) -> bool {
        match (exc, kind) {
            (Value::Instance(inst), Value::Class(class)) => inst.class.is_subclass_of(class),
            (_, Value::Tuple(kinds)) => kinds.iter().any(|k| self.exception_matches(exc, k)),
            _ => false,
        }
    }

    // ---- statements ----------------------------------------------------

    fn exec_block(&mut self, frame: &mut Frame, block: &[Stmt]) -> Exec<()> {
        for stmt in block {
            self.exec_stmt(frame, stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> Exec<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(frame, expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(frame, value)?;
                for target in targets {
                    self.assign(frame, target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(frame, target, *op, value)?,
            StmtKind::Pass => {}
            StmtKind::Break => return Err(Unwind::Break),
            StmtKind::Continue => return Err(Unwind::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::None,
                };
                return Err(Unwind::Return(value));
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(frame, test)?.truthy() {
                        return self.exec_block(frame, body);
                    }
                }
                if let Some(body) = orelse {
                    self.exec_block(frame, body)?;
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(frame, iter)?;
                let mut broke = false;
                for item in self.iterate(&iterable)? {
                    self.assign(frame, target, item)?;
                    match self.exec_block(frame, body) {
                        Ok(()) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => {
                            broke = true;
                            break;
                        }
                        Err(other) => return Err(other),
                    }
                }
                if let (false, Some(body)) = (broke, orelse) {
                    self.exec_block(frame, body)?;
                }
            }
            StmtKind::While { test, body, orelse } => {
                let mut broke = false;
                let mut iterations = 0usize;
                while self.eval(frame, test)?.truthy() {
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        return Err(self.raise("RuntimeError", "while loop iteration limit exceeded"));
                    }
                    match self.exec_block(frame, body) {
                        Ok(()) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => {
                            broke = true;
                            break;
                        }
                        Err(other) => return Err(other),
                    }
                }
                if let (false, Some(body)) = (broke, orelse) {
                    self.exec_block(frame, body)?;
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(frame, body, handlers, orelse.as_deref(), finally.as_deref()),
            StmtKind::With { items, body } => return self.exec_with(frame, items, body),
            StmtKind::FunctionDef(def) => {
                let function = Value::Function(Rc::new(self.make_function(frame, def)?));
                let decorated = self.decorate(frame, &def.decorators, function)?;
                self.store(frame, &def.name, decorated);
            }
            StmtKind::ClassDef(def) => {
                let class = self.make_class(frame, def)?;
                let decorated = self.decorate(frame, &def.decorators, class)?;
                self.store(frame, &def.name, decorated);
            }
            StmtKind::Import(names) => {
                for import in names {
                    let module = self.import_module(&import.module)?;
                    match &import.alias {
                        Some(alias) => self.store(frame, alias, Value::Module(module)),
                        None => {
                            let top = import.module.split('.').next().unwrap_or(&import.module);
                            let top = self.import_module(top)?;
                            self.store(frame, &top.name.clone(), Value::Module(top));
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, level, names } => {
                self.import_from(frame, module, *level, names.as_deref())?
            }
            StmtKind::Global(names) => frame.declared_global.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => frame.declared_nonlocal.extend(names.iter().cloned()),
            StmtKind::Raise { exc, cause } => {
                let Some(exc) = exc else {
                    return Err(match self.handling.last() {
                        Some(current) => Unwind::Raise(current.clone()),
                        None => self.raise("RuntimeError", "No active exception to reraise"),
                    });
                };
                let value = self.eval(frame, exc)?;
                let exception = self.raisable(value)?;
                if let Some(cause) = cause {
                    let cause = self.eval(frame, cause)?;
                    if let Value::Instance(inst) = &exception {
                        inst.attrs.borrow_mut().insert("__cause__".to_string(), cause);
                    }
                }
                return Err(Unwind::Raise(exception));
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(frame, test)?.truthy() {
                    let args = match msg {
                        Some(msg) => vec![self.eval(frame, msg)?],
                        None => Vec::new(),
                    };
                    return Err(Unwind::Raise(self.new_exception("AssertionError", args)));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(frame, target)?;
                }
            }
            StmtKind::Unsupported(kind) => {
                return Err(self.raise(
                    "NotImplementedError",
                    format!("unsupported statement '{}' at line {}", kind, stmt.line),
                ))
            }
        }
        Ok(())
    }

    fn exec_try(
        &mut self,
        frame: &mut Frame,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: Option<&[Stmt]>,
        finally: Option<&[Stmt]>,
    ) -> Exec<()> {
        let result = match self.exec_block(frame, body) {
            Err(Unwind::Raise(exc)) => self.handle(frame, handlers, exc),
            Ok(()) => match orelse {
                Some(block) => self.exec_block(frame, block),
                None => Ok(()),
            },
            other => other,
        };
        match (finally, &result) {
            (Some(_), Err(Unwind::Halt | Unwind::Yield(_))) | (None, _) => result,
            (Some(block), _) => {
                self.exec_block(frame, block)?;
                result
            }
        }
    }

    fn handle(&mut self, frame: &mut Frame, handlers: &[Handler], exc: Value) -> Exec<()> {
        for handler in handlers {
            let matches = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval(frame, kind)?;
                    self.exception_matches(&exc, &kind)
                }
            };
            if !matches {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(frame, name, exc.clone());
            }
            self.handling.push(exc);
            let result = self.exec_block(frame, &handler.body);
            self.handling.pop();
            return result;
        }
        Err(Unwind::Raise(exc))
    }

    fn exec_with(&mut self, frame: &mut Frame, items: &[(Expr, Option<Target>)], body: &[Stmt]) -> Exec<()> {
        let mut managers = Vec::new();
        for (expr, target) in items {
            let context = self.eval(frame, expr)?;
            let entered = match &context {
                Value::Instance(inst) if inst.class.lookup("__enter__").is_some() => {
                    let enter = self.get_attr(&context, "__enter__")?;
                    managers.push(context.clone());
                    self.call(&enter, Vec::new(), Vec::new())?
                }
                _ => context.clone(),
            };
            if let Some(target) = target {
                self.assign(frame, target, entered)?;
            }
        }

        let mut result = self.exec_block(frame, body);
        if matches!(result, Err(Unwind::Halt | Unwind::Yield(_))) {
            return result;
        }
        for manager in managers.iter().rev() {
            if manager_has_exit(manager) {
                let exit = self.get_attr(manager, "__exit__")?;
                let args = match &result {
                    Err(Unwind::Raise(exc)) => {
                        let kind = match exc {
                            Value::Instance(inst) => Value::Class(inst.class.clone()),
                            _ => Value::None,
                        };
                        vec![kind, exc.clone(), Value::None]
                    }
                    _ => vec![Value::None, Value::None, Value::None],
                };
                let suppress = self.call(&exit, args, Vec::new())?.truthy();
                if suppress && matches!(result, Err(Unwind::Raise(_))) {
                    result = Ok(());
                }
            }
        }
        result
    }

    fn aug_assign(&mut self, frame: &mut Frame, target: &Target, op: BinOp, value: &Expr) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(frame, name)?;
                let rhs = self.eval(frame, value)?;
                let updated = self.binop_inplace(op, current, rhs)?;
                self.store(frame, name, updated);
            }
            Target::Attribute(object, attr) => {
                let object = self.eval(frame, object)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(frame, value)?;
                let updated = self.binop_inplace(op, current, rhs)?;
                self.set_attr(&object, attr, updated)?;
            }
            Target::Subscript(object, index) => {
                let object = self.eval(frame, object)?;
                let index = self.eval(frame, index)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval(frame, value)?;
                let updated = self.binop_inplace(op, current, rhs)?;
                self.set_item(&object, index, updated)?;
            }
            Target::Tuple(_) | Target::Starred(_) => {
                return Err(self.raise("SyntaxError", "illegal expression for augmented assignment"))
            }
        }
        Ok(())
    }

    // ---- names ---------------------------------------------------------

    fn lookup(&self, frame: &Frame, name: &str) -> Exec<Value> {
        if frame.kind != FrameKind::Module && !frame.declared_global.contains(name) {
            if let Some(value) = frame.locals.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        for scope in &frame.closure {
            if let Some(value) = scope.borrow().get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = frame.globals.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.builtins.borrow().get(name) {
            return Ok(value.clone());
        }
        if frame.globals.lenient.get() {
            trace!(name, "Unresolved name after star import, using stand-in");
            return Ok(Value::Inert);
        }
        Err(self.raise("NameError", format!("name '{}' is not defined", name)))
    }

    fn store(&self, frame: &Frame, name: &str, value: Value) {
        if frame.declared_global.contains(name) {
            frame.globals.set(name, value);
            return;
        }
        if frame.declared_nonlocal.contains(name) {
            if let Some(scope) = frame.closure.iter().find(|s| s.borrow().contains_key(name)) {
                scope.borrow_mut().insert(name.to_string(), value);
                return;
            }
        }
        frame.locals.borrow_mut().insert(name.to_string(), value);
    }

    fn assign(&mut self, frame: &mut Frame, target: &Target, value: Value) -> Exec<()> {
        match target {
            Target::Name(name) => {
                self.store(frame, name, value);
                Ok(())
            }
            Target::Attribute(object, attr) => {
                let object = self.eval(frame, object)?;
                self.set_attr(&object, attr, value)
            }
            Target::Subscript(object, index) => {
                let object = self.eval(frame, object)?;
                if let Expr::Slice(start, stop, step) = index {
                    let bounds = self.eval_slice(frame, start, stop, step)?;
                    return self.set_slice(&object, bounds, value);
                }
                let index = self.eval(frame, index)?;
                self.set_item(&object, index, value)
            }
            Target::Tuple(targets) => self.unpack(frame, targets, value),
            Target::Starred(_) => Err(self.raise(
                "SyntaxError",
                "starred assignment target must be in a list or tuple",
            )),
        }
    }

    fn unpack(&mut self, frame: &mut Frame, targets: &[Target], value: Value) -> Exec<()> {
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        let items = match value {
            Value::Inert => vec![Value::Inert; targets.len()],
            other => self.iterate(&other)?,
        };
        match star {
            None => {
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(self.raise("ValueError", message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(frame, target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < star + after {
                    return Err(self.raise(
                        "ValueError",
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            star + after,
                            items.len()
                        ),
                    ));
                }
                let rest_end = items.len() - after;
                for (target, item) in targets[..star].iter().zip(&items[..star]) {
                    self.assign(frame, target, item.clone())?;
                }
                if let Target::Starred(inner) = &targets[star] {
                    let rest = Value::list(items[star..rest_end].to_vec());
                    self.assign(frame, inner, rest)?;
                }
                for (target, item) in targets[star + 1..].iter().zip(&items[rest_end..]) {
                    self.assign(frame, target, item.clone())?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, frame: &mut Frame, target: &Target) -> Exec<()> {
        match target {
            Target::Name(name) => {
                let removed = if frame.declared_global.contains(name) {
                    frame.globals.dict.borrow_mut().remove(name)
                } else {
                    frame.locals.borrow_mut().remove(name)
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(self.raise("NameError", format!("name '{}' is not defined", name))),
                }
            }
            Target::Subscript(object, index) => {
                let object = self.eval(frame, object)?;
                if let Expr::Slice(start, stop, step) = index {
                    let bounds = self.eval_slice(frame, start, stop, step)?;
                    return self.del_slice(&object, bounds);
                }
                let index = self.eval(frame, index)?;
                self.del_item(&object, &index)
            }
            Target::Attribute(object, attr) => {
                let object = self.eval(frame, object)?;
                match &object {
                    Value::Instance(inst) => {
                        inst.attrs.borrow_mut().remove(attr);
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(frame, target)?;
                }
                Ok(())
            }
            Target::Starred(_) => Err(self.raise("SyntaxError", "cannot delete starred")),
        }
    }

    // ---- imports -------------------------------------------------------

    /// Import a dotted module, creating stand-ins for unknown ones
    pub fn import_module(&mut self, name: &str) -> Exec<Rc<ModuleObj>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let parent = match name.rsplit_once('.') {
            Some((parent, leaf)) => Some((self.import_module(parent)?, leaf)),
            None => None,
        };
        let module = match framework::create_module(self, name) {
            Some(module) => {
                debug!(module = name, "Importing simulated framework module");
                module
            }
            None => {
                trace!(module = name, "Importing unknown module as stand-in");
                Rc::new(ModuleObj::new(name, true))
            }
        };
        if module.get("__name__").is_none() {
            module.set("__name__", Value::str(name));
        }
        self.modules.insert(name.to_string(), module.clone());
        if let Some((parent, leaf)) = parent {
            if !matches!(parent.get(leaf), Some(Value::Module(_))) {
                parent.set(leaf, Value::Module(module.clone()));
            }
        }
        Ok(module)
    }

    fn import_from(
        &mut self,
        frame: &mut Frame,
        module: &str,
        level: usize,
        names: Option<&[(String, Option<String>)]>,
    ) -> Exec<()> {
        // relative imports resolve against the test directory, which is not loaded
        let full = if level > 0 && module.is_empty() {
            "__sibling__".to_string()
        } else {
            module.to_string()
        };
        let source = self.import_module(&full)?;
        let Some(names) = names else {
            let exported: Vec<(String, Value)> = source
                .dict
                .borrow()
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (name, value) in exported {
                self.store(frame, &name, value);
            }
            if source.lenient.get() {
                frame.globals.lenient.set(true);
            }
            return Ok(());
        };
        for (name, alias) in names {
            let value = match source.get(name) {
                Some(value) => value,
                None => {
                    let submodule = format!("{}.{}", full, name);
                    if framework::is_known_module(&submodule) {
                        Value::Module(self.import_module(&submodule)?)
                    } else if source.lenient.get() {
                        Value::Inert
                    } else {
                        return Err(self.raise(
                            "ImportError",
                            format!("cannot import name '{}' from '{}'", name, full),
                        ));
                    }
                }
            };
            self.store(frame, alias.as_deref().unwrap_or(name), value);
        }
        Ok(())
    }

    // ---- definitions ---------------------------------------------------

    fn make_function(&mut self, frame: &mut Frame, def: &Rc<FunctionDef>) -> Exec<Function> {
        let mut defaults = Vec::with_capacity(def.params.positional.len());
        for param in &def.params.positional {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(frame, expr)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(def.params.kwonly.len());
        for param in &def.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(frame, expr)?),
                None => None,
            });
        }
        let closure = match frame.kind {
            FrameKind::Class => frame.closure.clone(),
            _ => frame.visible_scopes(),
        };
        Ok(Function {
            def: def.clone(),
            defaults,
            kw_defaults,
            closure,
            globals: frame.globals.clone(),
            owner: RefCell::new(None),
        })
    }

    fn make_class(&mut self, frame: &mut Frame, def: &ClassDef) -> Exec<Value> {
        let mut bases = Vec::new();
        for base in &def.bases {
            match self.eval(frame, base)? {
                Value::Class(class) => bases.push(class),
                other => trace!(class = %def.name, base = %other.type_name(), "Ignoring unmodeled base class"),
            }
        }

        let mut body_frame = frame.nested(FrameKind::Class);
        body_frame.closure = match frame.kind {
            FrameKind::Function => frame.visible_scopes(),
            _ => frame.closure.clone(),
        };
        body_frame
            .locals
            .borrow_mut()
            .insert("__module__".to_string(), Value::str(&frame.globals.name));
        self.exec_block(&mut body_frame, &def.body)?;

        let attrs = body_frame.locals.borrow().clone();
        let class = Rc::new(Class {
            name: def.name.clone(),
            bases,
            attrs: RefCell::new(attrs),
            builtin_exception: false,
        });
        for value in class.attrs.borrow().values() {
            let function = match value {
                Value::Function(f) => Some(f),
                Value::Native(native) => match native.as_ref() {
                    Native::StaticMethod(Value::Function(f)) | Native::ClassMethod(Value::Function(f)) => Some(f),
                    _ => None,
                },
                _ => None,
            };
            if let Some(function) = function {
                *function.owner.borrow_mut() = Some(Rc::downgrade(&class));
            }
        }
        Ok(Value::Class(class))
    }

    fn decorate(&mut self, frame: &mut Frame, decorators: &[Expr], target: Value) -> Exec<Value> {
        let mut evaluated = Vec::with_capacity(decorators.len());
        for decorator in decorators {
            evaluated.push(self.eval(frame, decorator)?);
        }
        let mut value = target;
        for decorator in evaluated.iter().rev() {
            match self.call(decorator, vec![value.clone()], Vec::new())? {
                // unknown decorators keep the function usable
                Value::Inert => {}
                decorated => value = decorated,
            }
        }
        Ok(value)
    }

    // ---- calls ---------------------------------------------------------

    pub fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Bound(bound) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(bound.receiver.clone());
                full.extend(args);
                self.call_function(&bound.function, full, kwargs)
            }
            Value::Builtin(name) => builtins::call(self, name, args, kwargs),
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                let name = method.name.clone();
                builtins::call_method(self, &receiver, &name, args, kwargs)
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            Value::Partial(partial) => {
                let mut full = partial.args.clone();
                full.extend(args);
                let mut all_kwargs = partial.kwargs.clone();
                all_kwargs.extend(kwargs);
                let inner = partial.func.clone();
                self.call(&inner, full, all_kwargs)
            }
            Value::Native(native) => match native.as_ref() {
                Native::StaticMethod(inner) | Native::ClassMethod(inner) => {
                    let inner = inner.clone();
                    self.call(&inner, args, kwargs)
                }
                Native::Namespace(..) => Ok(Value::Inert),
                other => Err(self.raise(
                    "TypeError",
                    format!("'{}' object is not callable", other.type_name()),
                )),
            },
            Value::Instance(inst) => match inst.class.lookup("__call__") {
                Some(method) => {
                    let bound = self.bind(method, func);
                    self.call(&bound, args, kwargs)
                }
                None => Err(self.raise(
                    "TypeError",
                    format!("'{}' object is not callable", inst.class.name),
                )),
            },
            Value::Inert => Ok(Value::Inert),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    pub fn instantiate(&mut self, class: &Rc<Class>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let instance = Rc::new(Instance::new(class.clone()));
        let value = Value::Instance(instance.clone());
        if class.is_exception() {
            instance
                .attrs
                .borrow_mut()
                .insert("args".to_string(), Value::tuple(args.clone()));
        }
        if let Some(init) = class.lookup("__init__") {
            let bound = self.bind(init, &value);
            self.call(&bound, args, kwargs)?;
        }
        Ok(value)
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let scope = self.bind_arguments(function, args, kwargs)?;
        if function.def.is_generator {
            return Ok(Value::Generator(Rc::new(RefCell::new(Generator {
                function: function.clone(),
                state: GeneratorState::Fresh(scope),
            }))));
        }
        self.run_body(function, scope)
    }

    fn run_body(&mut self, function: &Rc<Function>, scope: Scope) -> Exec<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(self.raise("RecursionError", "maximum recursion depth exceeded"));
        }
        let receiver = function
            .def
            .params
            .positional
            .first()
            .and_then(|p| scope.borrow().get(&p.name).cloned());
        let mut frame = Frame {
            locals: scope,
            closure: function.closure.clone(),
            globals: function.globals.clone(),
            kind: FrameKind::Function,
            declared_global: HashSet::new(),
            declared_nonlocal: HashSet::new(),
            owner: function.owner.borrow().as_ref().and_then(|w| w.upgrade()),
            receiver,
        };
        self.depth += 1;
        let result = self.exec_block(&mut frame, &function.def.body);
        self.depth -= 1;
        match result {
            Ok(()) | Err(Unwind::Break | Unwind::Continue) => Ok(Value::None),
            Err(Unwind::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn bind_arguments(&mut self, function: &Rc<Function>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Scope> {
        let params = &function.def.params;
        let name = &function.def.name;
        let mut slots: Vec<Option<Value>> = vec![None; params.positional.len()];
        let mut extra = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < slots.len() {
                slots[i] = Some(arg);
            } else if params.vararg.is_some() {
                extra.push(arg);
            } else {
                return Err(self.raise(
                    "TypeError",
                    format!(
                        "{}() takes {} positional arguments but more were given",
                        name,
                        slots.len()
                    ),
                ));
            }
        }

        let mut kwonly: Vec<Option<Value>> = vec![None; params.kwonly.len()];
        let mut extra_kwargs = Dict::new();
        for (key, value) in kwargs {
            if let Some(i) = params.positional.iter().position(|p| p.name == key) {
                if slots[i].is_some() {
                    return Err(self.raise(
                        "TypeError",
                        format!("{}() got multiple values for argument '{}'", name, key),
                    ));
                }
                slots[i] = Some(value);
            } else if let Some(i) = params.kwonly.iter().position(|p| p.name == key) {
                kwonly[i] = Some(value);
            } else if params.kwarg.is_some() {
                extra_kwargs.insert(Value::str(&key), value);
            } else {
                return Err(self.raise(
                    "TypeError",
                    format!("{}() got an unexpected keyword argument '{}'", name, key),
                ));
            }
        }

        let scope = new_scope();
        {
            let mut locals = scope.borrow_mut();
            for ((param, slot), default) in params.positional.iter().zip(slots).zip(&function.defaults) {
                match slot.or_else(|| default.clone()) {
                    Some(value) => {
                        locals.insert(param.name.clone(), value);
                    }
                    None => {
                        return Err(self.raise(
                            "TypeError",
                            format!("{}() missing required positional argument: '{}'", name, param.name),
                        ));
                    }
                }
            }
            for ((param, slot), default) in params.kwonly.iter().zip(kwonly).zip(&function.kw_defaults) {
                match slot.or_else(|| default.clone()) {
                    Some(value) => {
                        locals.insert(param.name.clone(), value);
                    }
                    None => {
                        return Err(self.raise(
                            "TypeError",
                            format!("{}() missing required keyword-only argument: '{}'", name, param.name),
                        ));
                    }
                }
            }
            if let Some(vararg) = &params.vararg {
                locals.insert(vararg.clone(), Value::tuple(extra));
            }
            if let Some(kwarg) = &params.kwarg {
                locals.insert(kwarg.clone(), Value::dict(extra_kwargs));
            }
        }
        Ok(scope)
    }

    /// Attach a receiver to a class attribute fetched through an instance
    pub fn bind(&self, attr: Value, receiver: &Value) -> Value {
        match attr {
            Value::Function(function) => Value::Bound(Rc::new(Bound {
                receiver: receiver.clone(),
                function,
            })),
            Value::Native(native) => match native.as_ref() {
                Native::StaticMethod(inner) => inner.clone(),
                Native::ClassMethod(Value::Function(function)) => {
                    let class = match receiver {
                        Value::Instance(inst) => Value::Class(inst.class.clone()),
                        other => other.clone(),
                    };
                    Value::Bound(Rc::new(Bound {
                        receiver: class,
                        function: function.clone(),
                    }))
                }
                _ => Value::Native(native.clone()),
            },
            other => other,
        }
    }

    fn zero_arg_super(&self, frame: &Frame) -> Exec<Value> {
        match (&frame.owner, &frame.receiver) {
            (Some(owner), Some(receiver)) => Ok(Value::native(Native::Super(owner.clone(), receiver.clone()))),
            _ => Err(self.raise("RuntimeError", "super(): no arguments")),
        }
    }

    // ---- generators ----------------------------------------------------

    /// Run a generator until its first `yield`
    pub fn advance(&mut self, generator: &Rc<RefCell<Generator>>) -> Exec<Value> {
        let (function, state) = {
            let mut gen = generator.borrow_mut();
            let state = std::mem::replace(&mut gen.state, GeneratorState::Suspended);
            (gen.function.clone(), state)
        };
        match state {
            GeneratorState::Fresh(scope) => {
                self.yield_modes.push(YieldMode::OneStep);
                let result = self.run_body(&function, scope);
                self.yield_modes.pop();
                match result {
                    Err(Unwind::Yield(value)) => Ok(value),
                    Ok(_) => {
                        generator.borrow_mut().state = GeneratorState::Finished;
                        Err(self.raise("StopIteration", ""))
                    }
                    Err(other) => {
                        generator.borrow_mut().state = GeneratorState::Finished;
                        Err(other)
                    }
                }
            }
            GeneratorState::Suspended => Err(self.raise(
                "RuntimeError",
                "resuming a generator past its first yield is not supported",
            )),
            GeneratorState::Finished => {
                generator.borrow_mut().state = GeneratorState::Finished;
                Err(self.raise("StopIteration", ""))
            }
        }
    }

    fn collect_generator(&mut self, generator: &Rc<RefCell<Generator>>) -> Exec<Vec<Value>> {
        let (function, state) = {
            let mut gen = generator.borrow_mut();
            let state = std::mem::replace(&mut gen.state, GeneratorState::Finished);
            (gen.function.clone(), state)
        };
        match state {
            GeneratorState::Fresh(scope) => {
                self.yield_modes.push(YieldMode::Collect(Vec::new()));
                let result = self.run_body(&function, scope);
                let items = match self.yield_modes.pop() {
                    Some(YieldMode::Collect(items)) => items,
                    _ => Vec::new(),
                };
                result.map(|_| items)
            }
            GeneratorState::Suspended => Err(self.raise(
                "RuntimeError",
                "resuming a generator past its first yield is not supported",
            )),
            GeneratorState::Finished => Ok(Vec::new()),
        }
    }

    // ---- expressions ---------------------------------------------------

    fn eval(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Name(name) => self.lookup(frame, name),
            Expr::Const(constant) => Ok(match constant {
                Const::None => Value::None,
                Const::Bool(b) => Value::Bool(*b),
                Const::Int(i) => Value::Int(*i),
                Const::Float(f) => Value::Float(*f),
                Const::Str(s) => Value::str(s),
                Const::Ellipsis => Value::Inert,
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(text) => out.push_str(text),
                        FPart::Expr { expr, conversion, spec } => {
                            let value = self.eval(frame, expr)?;
                            let value = match conversion {
                                Some('r') | Some('a') => Value::str(self.repr_value(&value)?),
                                Some('s') => Value::str(self.to_str(&value)?),
                                _ => value,
                            };
                            let rendered = match spec {
                                Some(spec) if !spec.is_empty() => format::format_spec(self, &value, spec)?,
                                _ => self.to_str(&value)?,
                            };
                            out.push_str(&rendered);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::List(items) => Ok(Value::list(self.eval_items(frame, items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_items(frame, items)?)),
            Expr::Set(items) => Ok(Value::set(self.eval_items(frame, items)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    match key {
                        Some(key) => {
                            let key = self.eval(frame, key)?;
                            let value = self.eval(frame, value)?;
                            dict.insert(key, value);
                        }
                        None => {
                            let other = self.eval(frame, value)?;
                            for (k, v) in self.mapping_pairs(&other)? {
                                dict.insert(k, v);
                            }
                        }
                    }
                }
                Ok(Value::dict(dict))
            }
            Expr::Starred(_) => Err(self.raise("SyntaxError", "can't use starred expression here")),
            Expr::Attribute(object, attr) => {
                let object = self.eval(frame, object)?;
                self.get_attr(&object, attr)
            }
            Expr::Subscript(object, index) => {
                let object = self.eval(frame, object)?;
                if let Expr::Slice(start, stop, step) = index.as_ref() {
                    let start = self.eval_opt(frame, start.as_deref())?;
                    let stop = self.eval_opt(frame, stop.as_deref())?;
                    let step = self.eval_opt(frame, step.as_deref())?;
                    return self.slice(&object, start, stop, step);
                }
                let index = self.eval(frame, index)?;
                self.get_item(&object, &index)
            }
            Expr::Slice(..) => Err(self.raise("NotImplementedError", "slice objects are not supported")),
            Expr::Call { func, args } => {
                if let (Expr::Name(name), true) = (func.as_ref(), args.is_empty()) {
                    if name == "super" {
                        return self.zero_arg_super(frame);
                    }
                }
                let callee = self.eval(frame, func)?;
                let (args, kwargs) = self.eval_args(frame, args)?;
                self.call(&callee, args, kwargs)
            }
            Expr::BinOp(left, op, right) => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                self.binop(*op, left, right)
            }
            Expr::UnaryOp(op, operand) => {
                let value = self.eval(frame, operand)?;
                self.unary(*op, value)
            }
            Expr::BoolOp(op, left, right) => {
                let left = self.eval(frame, left)?;
                match (op, left.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(left),
                    _ => self.eval(frame, right),
                }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(frame, first)?;
                for (op, right) in rest {
                    let right = self.eval(frame, right)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(frame, test)?.truthy() {
                    self.eval(frame, body)
                } else {
                    self.eval(frame, orelse)
                }
            }
            Expr::Lambda(def) => Ok(Value::Function(Rc::new(self.make_function(frame, def)?))),
            Expr::ListComp { elt, generators } => {
                let mut out = CompOut::Items(elt, Vec::new());
                let mut inner = frame.nested(FrameKind::Function);
                self.comprehension(&mut inner, generators, 0, &mut out)?;
                match out {
                    CompOut::Items(_, items) => Ok(Value::list(items)),
                    CompOut::Pairs(..) => Ok(Value::list(Vec::new())),
                }
            }
            Expr::SetComp { elt, generators } => {
                let mut out = CompOut::Items(elt, Vec::new());
                let mut inner = frame.nested(FrameKind::Function);
                self.comprehension(&mut inner, generators, 0, &mut out)?;
                match out {
                    CompOut::Items(_, items) => Ok(Value::set(items)),
                    CompOut::Pairs(..) => Ok(Value::set(Vec::new())),
                }
            }
            Expr::DictComp { key, value, generators } => {
                let mut out = CompOut::Pairs(key, value, Dict::new());
                let mut inner = frame.nested(FrameKind::Function);
                self.comprehension(&mut inner, generators, 0, &mut out)?;
                match out {
                    CompOut::Pairs(_, _, dict) => Ok(Value::dict(dict)),
                    CompOut::Items(..) => Ok(Value::dict(Dict::new())),
                }
            }
            Expr::Yield(value) => {
                let value = match value {
                    Some(expr) => self.eval(frame, expr)?,
                    None => Value::None,
                };
                match self.yield_modes.last_mut() {
                    Some(YieldMode::Collect(items)) => {
                        items.push(value);
                        Ok(Value::None)
                    }
                    Some(YieldMode::OneStep) => Err(Unwind::Yield(value)),
                    None => Err(self.raise("SyntaxError", "'yield' outside function")),
                }
            }
            Expr::NamedExpr(name, value) => {
                let value = self.eval(frame, value)?;
                self.store(frame, name, value.clone());
                Ok(value)
            }
            Expr::IntOverflow(literal) => Err(self.raise(
                "OverflowError",
                format!("integer literal {} does not fit in 64 bits", literal),
            )),
            Expr::Unsupported(kind) => Err(self.raise(
                "NotImplementedError",
                format!("unsupported expression '{}'", kind),
            )),
        }
    }

    fn eval_opt(&mut self, frame: &mut Frame, expr: Option<&Expr>) -> Exec<Option<Value>> {
        match expr {
            Some(expr) => Ok(Some(self.eval(frame, expr)?)),
            None => Ok(None),
        }
    }

    fn eval_items(&mut self, frame: &mut Frame, items: &[Expr]) -> Exec<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let value = self.eval(frame, inner)?;
                    out.extend(self.iterate(&value)?);
                }
                other => out.push(self.eval(frame, other)?),
            }
        }
        Ok(out)
    }

    fn eval_args(&mut self, frame: &mut Frame, args: &[Arg]) -> Exec<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(frame, expr)?),
                Arg::Star(expr) => {
                    let value = self.eval(frame, expr)?;
                    positional.extend(self.iterate(&value)?);
                }
                Arg::Keyword(name, expr) => keywords.push((name.clone(), self.eval(frame, expr)?)),
                Arg::DoubleStar(expr) => {
                    let value = self.eval(frame, expr)?;
                    for (key, value) in self.mapping_pairs(&value)? {
                        match key.as_str() {
                            Some(key) => keywords.push((key.to_string(), value)),
                            None => return Err(self.raise("TypeError", "keywords must be strings")),
                        }
                    }
                }
            }
        }
        Ok((positional, keywords))
    }

    fn mapping_pairs(&mut self, value: &Value) -> Exec<Vec<(Value, Value)>> {
        match value {
            Value::Dict(dict) => Ok(dict.borrow().iter().cloned().collect()),
            Value::Inert | Value::None => Ok(Vec::new()),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object is not a mapping", other.type_name()),
            )),
        }
    }

    fn comprehension(
        &mut self,
        frame: &mut Frame,
        generators: &[Comprehension],
        level: usize,
        out: &mut CompOut<'_>,
    ) -> Exec<()> {
        let Some(generator) = generators.get(level) else {
            match out {
                CompOut::Items(elt, items) => {
                    let value = self.eval(frame, elt)?;
                    items.push(value);
                }
                CompOut::Pairs(key, value, dict) => {
                    let key = self.eval(frame, key)?;
                    let value = self.eval(frame, value)?;
                    dict.insert(key, value);
                }
            }
            return Ok(());
        };
        let iterable = self.eval(frame, &generator.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.assign(frame, &generator.target, item)?;
            for condition in &generator.ifs {
                if !self.eval(frame, condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(frame, generators, level + 1, out)?;
        }
        Ok(())
    }

    // ---- object protocol -----------------------------------------------

    pub fn get_attr(&mut self, object: &Value, name: &str) -> Exec<Value> {
        match object {
            Value::Inert => Ok(Value::Inert),
            Value::Module(module) => {
                if let Some(value) = module.get(name) {
                    return Ok(value);
                }
                let submodule = format!("{}.{}", module.name, name);
                if let Some(loaded) = self.modules.get(&submodule) {
                    return Ok(Value::Module(loaded.clone()));
                }
                if framework::is_known_module(&submodule) {
                    return Ok(Value::Module(self.import_module(&submodule)?));
                }
                if module.lenient.get() {
                    return Ok(Value::Inert);
                }
                Err(self.raise(
                    "AttributeError",
                    format!("module '{}' has no attribute '{}'", module.name, name),
                ))
            }
            Value::Instance(inst) => {
                if name == "__class__" {
                    return Ok(Value::Class(inst.class.clone()));
                }
                if let Some(value) = inst.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(value) = inst.class.lookup(name) {
                    return Ok(self.bind(value, object));
                }
                if name == "__init__" {
                    return Ok(Value::method(object.clone(), "__init__"));
                }
                if let Some(getter) = inst.class.lookup("__getattr__") {
                    let bound = self.bind(getter, object);
                    return self.call(&bound, vec![Value::str(name)], Vec::new());
                }
                Err(self.raise(
                    "AttributeError",
                    format!("'{}' object has no attribute '{}'", inst.class.name, name),
                ))
            }
            Value::Class(class) => match name {
                "__name__" | "__qualname__" => Ok(Value::str(&class.name)),
                _ => match class.lookup(name) {
                    Some(Value::Native(native)) => match native.as_ref() {
                        Native::StaticMethod(inner) => Ok(inner.clone()),
                        Native::ClassMethod(_) => Ok(self.bind(Value::Native(native.clone()), object)),
                        _ => Ok(Value::Native(native.clone())),
                    },
                    Some(value) => Ok(value),
                    None => Err(self.raise(
                        "AttributeError",
                        format!("type object '{}' has no attribute '{}'", class.name, name),
                    )),
                },
            },
            Value::Function(function) => match name {
                "__name__" | "__qualname__" => Ok(Value::str(&function.def.name)),
                "__module__" => Ok(Value::str(&function.globals.name)),
                "__doc__" => Ok(Value::None),
                _ => Err(self.raise(
                    "AttributeError",
                    format!("'function' object has no attribute '{}'", name),
                )),
            },
            Value::Bound(bound) => match name {
                "__self__" => Ok(bound.receiver.clone()),
                "__name__" => Ok(Value::str(&bound.function.def.name)),
                _ => Ok(Value::Inert),
            },
            Value::Builtin(builtin) => match name {
                "__name__" => Ok(Value::str(builtin.rsplit('.').next().unwrap_or(builtin))),
                _ => Ok(Value::Inert),
            },
            Value::Native(native) => match native.as_ref() {
                Native::Super(owner, receiver) => self.super_attr(owner, receiver, name),
                _ => framework::native_attr(self, object, native, name),
            },
            Value::Generator(_) => match name {
                "__next__" | "send" | "close" => Ok(Value::method(object.clone(), name)),
                _ => Err(self.raise(
                    "AttributeError",
                    format!("'generator' object has no attribute '{}'", name),
                )),
            },
            other => {
                if builtins::has_method(other, name) {
                    Ok(Value::method(other.clone(), name))
                } else {
                    Err(self.raise(
                        "AttributeError",
                        format!("'{}' object has no attribute '{}'", other.type_name(), name),
                    ))
                }
            }
        }
    }

    fn super_attr(&mut self, owner: &Rc<Class>, receiver: &Value, name: &str) -> Exec<Value> {
        if let Some(value) = owner.bases.iter().find_map(|b| b.lookup(name)) {
            return Ok(self.bind(value, receiver));
        }
        match name {
            "__init__" => Ok(Value::method(receiver.clone(), "__init__")),
            _ => Err(self.raise(
                "AttributeError",
                format!("'super' object has no attribute '{}'", name),
            )),
        }
    }

    pub fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> Exec<()> {
        match object {
            Value::Instance(inst) => {
                if let Some(setter) = inst.class.lookup("__setattr__") {
                    let bound = self.bind(setter, object);
                    self.call(&bound, vec![Value::str(name), value], Vec::new())?;
                } else {
                    inst.attrs.borrow_mut().insert(name.to_string(), value);
                }
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.set(name, value);
                Ok(())
            }
            Value::Native(native) => framework::set_native_attr(self, native, name, value),
            Value::Function(_) | Value::Inert => Ok(()),
            other => Err(self.raise(
                "AttributeError",
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            )),
        }
    }

    pub fn get_item(&mut self, object: &Value, index: &Value) -> Exec<Value> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let i = self.sequence_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = self.sequence_index(index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = self.sequence_index(index, chars.len())?;
                Ok(Value::str(chars[i].to_string()))
            }
            Value::Dict(dict) => {
                let found = dict.borrow().get(index);
                match found {
                    Some(value) => Ok(value),
                    None => Err(Unwind::Raise(self.new_exception("KeyError", vec![index.clone()]))),
                }
            }
            Value::Instance(inst) => match inst.class.lookup("__getitem__") {
                Some(getter) => {
                    let bound = self.bind(getter, object);
                    self.call(&bound, vec![index.clone()], Vec::new())
                }
                None => Err(self.raise(
                    "TypeError",
                    format!("'{}' object is not subscriptable", inst.class.name),
                )),
            },
            Value::Native(native) => framework::native_item(self, native, index),
            Value::Class(_) | Value::Builtin(_) | Value::Inert => Ok(Value::Inert),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    fn sequence_index(&self, index: &Value, len: usize) -> Exec<usize> {
        let Some(raw) = index.as_int() else {
            return Err(self.raise(
                "TypeError",
                format!("indices must be integers, not {}", index.type_name()),
            ));
        };
        let resolved = if raw < 0 { raw + len as i64 } else { raw };
        if resolved < 0 || resolved >= len as i64 {
            return Err(self.raise("IndexError", "index out of range"));
        }
        Ok(resolved as usize)
    }

    pub fn set_item(&mut self, object: &Value, index: Value, value: Value) -> Exec<()> {
        match object {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = self.sequence_index(&index, len)?;
                items.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                dict.borrow_mut().insert(index, value);
                Ok(())
            }
            Value::Instance(inst) => match inst.class.lookup("__setitem__") {
                Some(setter) => {
                    let bound = self.bind(setter, object);
                    self.call(&bound, vec![index, value], Vec::new())?;
                    Ok(())
                }
                None => Err(self.raise(
                    "TypeError",
                    format!("'{}' object does not support item assignment", inst.class.name),
                )),
            },
            Value::Native(native) => framework::set_native_item(self, native, index, value),
            Value::Inert => Ok(()),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object does not support item assignment", other.type_name()),
            )),
        }
    }

    fn del_item(&mut self, object: &Value, index: &Value) -> Exec<()> {
        match object {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = self.sequence_index(index, len)?;
                items.borrow_mut().remove(i);
                Ok(())
            }
            Value::Dict(dict) => {
                let removed = dict.borrow_mut().remove(index);
                match removed {
                    Some(_) => Ok(()),
                    None => Err(Unwind::Raise(self.new_exception("KeyError", vec![index.clone()]))),
                }
            }
            Value::Inert => Ok(()),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object does not support item deletion", other.type_name()),
            )),
        }
    }

    fn slice_args(&self, start: Option<Value>, stop: Option<Value>, step: Option<Value>) -> Exec<SliceArgs> {
        let bound = |v: Option<Value>| -> Result<Option<i64>, ()> {
            match v {
                None | Some(Value::None) => Ok(None),
                Some(v) => v.as_int().map(Some).ok_or(()),
            }
        };
        let (start, stop, step) = match (bound(start), bound(stop), bound(step)) {
            (Ok(a), Ok(b), Ok(c)) => (a, b, c.unwrap_or(1)),
            _ => return Err(self.raise("TypeError", "slice indices must be integers or None")),
        };
        if step == 0 {
            return Err(self.raise("ValueError", "slice step cannot be zero"));
        }
        Ok((start, stop, step))
    }

    fn eval_slice(
        &mut self,
        frame: &mut Frame,
        start: &Option<Box<Expr>>,
        stop: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Exec<SliceArgs> {
        let start = self.eval_opt(frame, start.as_deref())?;
        let stop = self.eval_opt(frame, stop.as_deref())?;
        let step = self.eval_opt(frame, step.as_deref())?;
        self.slice_args(start, stop, step)
    }

    fn set_slice(&mut self, object: &Value, (start, stop, step): SliceArgs, value: Value) -> Exec<()> {
        let items = match object {
            Value::List(items) => items.clone(),
            Value::Inert => return Ok(()),
            other => {
                return Err(self.raise(
                    "TypeError",
                    format!("'{}' object does not support item assignment", other.type_name()),
                ))
            }
        };
        let replacement = self.iterate(&value)?;
        let len = items.borrow().len();
        if step == 1 {
            let (low, high) = slice_span(len, start, stop);
            items.borrow_mut().splice(low..high, replacement);
            return Ok(());
        }
        let indices = slice_indices(len, start, stop, step);
        if indices.len() != replacement.len() {
            return Err(self.raise(
                "ValueError",
                format!(
                    "attempt to assign sequence of size {} to extended slice of size {}",
                    replacement.len(),
                    indices.len()
                ),
            ));
        }
        let mut items = items.borrow_mut();
        for (i, item) in indices.into_iter().zip(replacement) {
            items[i] = item;
        }
        Ok(())
    }

    fn del_slice(&mut self, object: &Value, (start, stop, step): SliceArgs) -> Exec<()> {
        match object {
            Value::List(items) => {
                let len = items.borrow().len();
                let mut doomed = slice_indices(len, start, stop, step);
                doomed.sort_unstable();
                let mut items = items.borrow_mut();
                for i in doomed.into_iter().rev() {
                    items.remove(i);
                }
                Ok(())
            }
            Value::Inert => Ok(()),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object does not support item deletion", other.type_name()),
            )),
        }
    }

    fn slice(&mut self, object: &Value, start: Option<Value>, stop: Option<Value>, step: Option<Value>) -> Exec<Value> {
        let (start, stop, step) = self.slice_args(start, stop, step)?;
        let pick = |len: usize| -> Vec<usize> { slice_indices(len, start, stop, step) };
        match object {
            Value::List(items) => {
                let items = items.borrow();
                Ok(Value::list(pick(items.len()).into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => Ok(Value::tuple(
                pick(items.len()).into_iter().map(|i| items[i].clone()).collect(),
            )),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::str(pick(chars.len()).into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Inert => Ok(Value::Inert),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    /// Materialize an iterable
    pub fn iterate(&mut self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::List(items) | Value::Set(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Dict(dict) => Ok(dict.borrow().keys()),
            Value::Generator(generator) => {
                let generator = generator.clone();
                self.collect_generator(&generator)
            }
            Value::Native(native) => framework::native_iter(self, native),
            Value::Instance(inst) if inst.class.lookup("__iter__").is_some() => {
                let iter = self.get_attr(value, "__iter__")?;
                let iterator = self.call(&iter, Vec::new(), Vec::new())?;
                self.iterate(&iterator)
            }
            Value::Inert => Ok(Vec::new()),
            other => Err(self.raise(
                "TypeError",
                format!("'{}' object is not iterable", other.type_name()),
            )),
        }
    }

    pub fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        match container {
            Value::Str(s) => match item.as_str() {
                Some(needle) => Ok(s.contains(needle)),
                None => Err(self.raise(
                    "TypeError",
                    "'in <string>' requires string as left operand",
                )),
            },
            Value::List(items) | Value::Set(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
            Value::Dict(dict) => Ok(dict.borrow().contains(item)),
            Value::Native(native) => framework::native_contains(self, native, item),
            Value::Inert => Ok(false),
            Value::Instance(inst) if inst.class.lookup("__contains__").is_some() => {
                let method = self.get_attr(container, "__contains__")?;
                Ok(self.call(&method, vec![item.clone()], Vec::new())?.truthy())
            }
            other => {
                let items = self.iterate(other)?;
                Ok(items.iter().any(|v| py_eq(v, item)))
            }
        }
    }

    pub fn to_str(&mut self, value: &Value) -> Exec<String> {
        if let Value::Instance(inst) = value {
            if !inst.class.is_exception() || inst.class.lookup("__str__").is_some() {
                for hook in ["__str__", "__repr__"] {
                    if let Some(method) = inst.class.lookup(hook) {
                        let bound = self.bind(method, value);
                        let rendered = self.call(&bound, Vec::new(), Vec::new())?;
                        return Ok(rendered.to_display());
                    }
                }
            }
        }
        Ok(value.to_display())
    }

    pub fn repr_value(&mut self, value: &Value) -> Exec<String> {
        if let Value::Instance(inst) = value {
            if let Some(method) = inst.class.lookup("__repr__") {
                let bound = self.bind(method, value);
                return Ok(self.call(&bound, Vec::new(), Vec::new())?.to_display());
            }
        }
        Ok(value.repr())
    }

    // ---- operators -----------------------------------------------------

    fn binop_inplace(&mut self, op: BinOp, left: Value, right: Value) -> Exec<Value> {
        match (&left, op) {
            (Value::List(items), BinOp::Add) => {
                let extra = self.iterate(&right)?;
                items.borrow_mut().extend(extra);
                Ok(left)
            }
            (Value::Dict(dict), BinOp::BitOr) => {
                for (k, v) in self.mapping_pairs(&right)? {
                    dict.borrow_mut().insert(k, v);
                }
                Ok(left)
            }
            _ => self.binop(op, left, right),
        }
    }

    pub fn binop(&mut self, op: BinOp, left: Value, right: Value) -> Exec<Value> {
        if matches!(left, Value::Inert) || matches!(right, Value::Inert) {
            return Ok(Value::Inert);
        }
        if let (Value::Str(fmt), BinOp::Mod) = (&left, op) {
            return Ok(Value::str(format::percent_format(self, fmt, &right)?));
        }
        let result = match (&left, &right) {
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
                int_binop(self, op, a, b)?
            }
            (Value::Int(_) | Value::Bool(_) | Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_)) => {
                let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
                float_binop(self, op, a, b)?
            }
            (Value::Str(a), Value::Str(b)) if op == BinOp::Add => Some(Value::str(format!("{}{}", a, b))),
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == BinOp::Mul => {
                let total = self.repeated_len(s.len(), *n)?;
                Some(Value::str(if total == 0 {
                    String::new()
                } else {
                    s.repeat(total / s.len())
                }))
            }
            (Value::List(a), Value::List(b)) if op == BinOp::Add => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Some(Value::list(items))
            }
            (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
                let mut items = a.to_vec();
                items.extend(b.iter().cloned());
                Some(Value::tuple(items))
            }
            (Value::List(a), Value::Int(n)) | (Value::Int(n), Value::List(a)) if op == BinOp::Mul => {
                let items = a.borrow();
                Some(Value::list(repeat_items(self, &items, *n)?))
            }
            (Value::Tuple(a), Value::Int(n)) | (Value::Int(n), Value::Tuple(a)) if op == BinOp::Mul => {
                Some(Value::tuple(repeat_items(self, a, *n)?))
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                match op {
                    BinOp::BitOr => Some(Value::set(a.iter().chain(b.iter()).cloned().collect())),
                    BinOp::BitAnd => Some(Value::set(
                        a.iter().filter(|x| b.iter().any(|y| py_eq(x, y))).cloned().collect(),
                    )),
                    BinOp::Sub => Some(Value::set(
                        a.iter().filter(|x| !b.iter().any(|y| py_eq(x, y))).cloned().collect(),
                    )),
                    BinOp::BitXor => Some(Value::set(
                        a.iter()
                            .filter(|x| !b.iter().any(|y| py_eq(x, y)))
                            .chain(b.iter().filter(|y| !a.iter().any(|x| py_eq(x, y))))
                            .cloned()
                            .collect(),
                    )),
                    _ => None,
                }
            }
            (Value::Dict(a), Value::Dict(b)) if op == BinOp::BitOr => {
                let mut merged = a.borrow().clone();
                for (k, v) in b.borrow().iter() {
                    merged.insert(k.clone(), v.clone());
                }
                Some(Value::dict(merged))
            }
            _ => None,
        };
        match result {
            Some(value) => Ok(value),
            None => Err(self.raise(
                "TypeError",
                format!(
                    "unsupported operand type(s) for {}: '{}' and '{}'",
                    op_symbol(op),
                    left.type_name(),
                    right.type_name()
                ),
            )),
        }
    }

    fn unary(&mut self, op: UnaryOp, value: Value) -> Exec<Value> {
        match (op, &value) {
            (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
            (_, Value::Inert) => Ok(Value::Inert),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, _) if value.as_int().is_some() => {
                match value.as_int().unwrap_or(0).checked_neg() {
                    Some(n) => Ok(Value::Int(n)),
                    None => Err(self.raise("OverflowError", "integer negation overflows 64 bits")),
                }
            }
            (UnaryOp::Pos, Value::Float(_) | Value::Int(_)) => Ok(value),
            (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
            (UnaryOp::Invert, _) if value.as_int().is_some() => Ok(Value::Int(!value.as_int().unwrap_or(0))),
            _ => Err(self.raise(
                "TypeError",
                format!("bad operand type for unary operator: '{}'", value.type_name()),
            )),
        }
    }

    pub fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        match op {
            CmpOp::Eq => self.equals(left, right),
            CmpOp::NotEq => Ok(!self.equals(left, right)?),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Is => Ok(is_same(left, right)),
            CmpOp::IsNot => Ok(!is_same(left, right)),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                if matches!(left, Value::Inert) || matches!(right, Value::Inert) {
                    return Ok(false);
                }
                match py_cmp(left, right) {
                    Some(ordering) => Ok(match op {
                        CmpOp::Lt => ordering.is_lt(),
                        CmpOp::LtE => ordering.is_le(),
                        CmpOp::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    }),
                    None => Err(self.raise(
                        "TypeError",
                        format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            cmp_symbol(op),
                            left.type_name(),
                            right.type_name()
                        ),
                    )),
                }
            }
        }
    }

    fn equals(&mut self, left: &Value, right: &Value) -> Exec<bool> {
        if let Value::Instance(inst) = left {
            if let Some(method) = inst.class.lookup("__eq__") {
                let bound = self.bind(method, left);
                return Ok(self.call(&bound, vec![right.clone()], Vec::new())?.truthy());
            }
        }
        Ok(py_eq(left, right))
    }
}

fn manager_has_exit(manager: &Value) -> bool {
    matches!(manager, Value::Instance(inst) if inst.class.lookup("__exit__").is_some())
}

fn repeat_items(interp: &Interpreter, items: &[Value], times: i64) -> Exec<Vec<Value>> {
    let total = interp.repeated_len(items.len(), times)?;
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

/// Bounds of a unit-step slice as a `low..high` range
fn slice_span(len: usize, start: Option<i64>, stop: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let resolve = |v: i64| if v < 0 { v.saturating_add(len).max(0) } else { v.min(len) };
    let low = start.map(resolve).unwrap_or(0);
    let high = stop.map(resolve).unwrap_or(len).max(low);
    (low as usize, high as usize)
}

/// Indices selected by a Python slice over a sequence of `len` items
pub fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| v.max(low).min(high);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(start.map(resolve).unwrap_or(0), 0, len);
        let stop = clamp(stop.map(resolve).unwrap_or(len), 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = clamp(start.map(resolve).unwrap_or(len - 1), -1, len - 1);
        let stop = clamp(stop.map(resolve).unwrap_or(-1), -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

fn int_binop(interp: &Interpreter, op: BinOp, a: i64, b: i64) -> Exec<Option<Value>> {
    let checked = |v: Option<i64>| {
        v.map(Value::Int).ok_or_else(|| {
            interp.raise(
                "OverflowError",
                format!("{} {} {} does not fit in 64 bits", a, op_symbol(op), b),
            )
        })
    };
    let zero = || interp.raise("ZeroDivisionError", "integer division or modulo by zero");
    Ok(Some(match op {
        BinOp::Add => checked(a.checked_add(b))?,
        BinOp::Sub => checked(a.checked_sub(b))?,
        BinOp::Mul => checked(a.checked_mul(b))?,
        BinOp::Div => {
            if b == 0 {
                return Err(interp.raise("ZeroDivisionError", "division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let q = checked(a.checked_div(b))?.as_int().unwrap_or(0);
            // a % b cannot overflow once a / b did not
            Value::Int(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero());
            }
            let r = a.wrapping_rem(b);
            Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        BinOp::Pow => match (a, b) {
            (0, b) if b < 0 => {
                return Err(interp.raise("ZeroDivisionError", "0.0 cannot be raised to a negative power"))
            }
            (_, b) if b < 0 => Value::Float((a as f64).powf(b as f64)),
            (0, b) if b > 0 => Value::Int(0),
            (1, _) => Value::Int(1),
            (-1, b) => Value::Int(if b % 2 == 0 { 1 } else { -1 }),
            _ => checked(u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp)))?,
        },
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::LShift => {
            if b < 0 {
                return Err(interp.raise("ValueError", "negative shift count"));
            }
            if a == 0 {
                Value::Int(0)
            } else {
                let shifted = u32::try_from(b)
                    .ok()
                    .filter(|shift| *shift < 64)
                    .and_then(|shift| a.checked_shl(shift).filter(|v| v >> shift == a));
                checked(shifted)?
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(interp.raise("ValueError", "negative shift count"));
            }
            Value::Int(a >> b.min(63))
        }
        BinOp::MatMul => return Ok(None),
    }))
}

fn float_binop(interp: &Interpreter, op: BinOp, a: f64, b: f64) -> Exec<Option<Value>> {
    let zero = || interp.raise("ZeroDivisionError", "float division by zero");
    Ok(Some(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero());
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
        _ => return Ok(None),
    })))
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitOr => "|",
        BinOp::BitAnd => "&",
        BinOp::BitXor => "^",
        BinOp::LShift => "<<",
        BinOp::RShift => ">>",
        BinOp::MatMul => "@",
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        _ => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::super::lower::parse_module;
    use super::*;
    use crate::runtime::{CaptureObserver, CapturePolicy, MockExecutionEnvironment};
    use yare::parameterized;

    fn interpreter() -> Interpreter {
        let mut env = MockExecutionEnvironment::new();
        env.expect_log().returning(|_, _, _| ());
        let observer: Rc<RefCell<dyn ConstructionObserver>> =
            Rc::new(RefCell::new(CaptureObserver::new(CapturePolicy::Observe)));
        Interpreter::new(Rc::new(env), observer, Path::new("/topotests/demo/test_demo.py"))
    }

    fn run(src: &str) -> (Interpreter, Rc<ModuleObj>) {
        let module = parse_module(src).unwrap();
        let mut interp = interpreter();
        let obj = match interp.exec_module("test_demo", &module) {
            Ok(obj) => obj,
            Err(Unwind::Raise(exc)) => panic!("raised {}", interp.describe(&exc)),
            Err(_) => panic!("unexpected unwind"),
        };
        (interp, obj)
    }

    fn global(src: &str, name: &str) -> String {
        let (_, module) = run(src);
        module.get(name).map(|v| v.repr()).unwrap_or_default()
    }

    fn raised(src: &str) -> String {
        let module = parse_module(src).unwrap();
        let mut interp = interpreter();
        match interp.exec_module("test_demo", &module) {
            Err(Unwind::Raise(exc)) => interp.describe(&exc),
            _ => panic!("expected an exception"),
        }
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(global("x = 7 // 2 + 2 ** 3 - -7 % 3\n", "x"), "9");
        assert_eq!(global("x = 'r' + str(1) * 2\n", "x"), "'r11'");
        assert_eq!(global("x = 1 / 2\n", "x"), "0.5");
        assert_eq!(global("x = 1 < 2 < 3 and 'a' in 'abc'\n", "x"), "True");
    }

    #[test]
    fn test_functions_closures_and_defaults() {
        let src = "\
def make(prefix, start=1):
    def name(i):
        return prefix + str(i + start)
    return name

f = make('r')
x = [f(i) for i in range(3)]
";
        assert_eq!(global(src, "x"), "['r1', 'r2', 'r3']");
    }

    #[test]
    fn test_varargs_and_kwargs() {
        let src = "\
def f(a, *rest, key=None, **kw):
    return (a, rest, key, kw)
x = f(1, 2, 3, key='k', extra=True)
";
        assert_eq!(global(src, "x"), "(1, (2, 3), 'k', {'extra': True})");
    }

    #[test]
    fn test_classes_and_super() {
        let src = "\
class Base:
    def __init__(self, name):
        self.name = name
    def label(self):
        return 'base-' + self.name

class Child(Base):
    def __init__(self, name):
        super().__init__(name.upper())
    def label(self):
        return 'child-' + super().label()

x = Child('r1').label()
";
        assert_eq!(global(src, "x"), "'child-base-R1'");
    }

    #[test]
    fn test_try_except_finally() {
        let src = "\
log = []
try:
    try:
        {}['missing']
    finally:
        log.append('finally')
except KeyError as e:
    log.append('caught ' + repr(e.args[0]))
";
        assert_eq!(global(src, "log"), "['finally', \"caught 'missing'\"]");
    }

    #[test]
    fn test_unpacking() {
        assert_eq!(global("a, *b, c = [1, 2, 3, 4]\nx = (a, b, c)\n", "x"), "(1, [2, 3], 4)");
        assert!(raised("a, b = [1, 2, 3]\n").starts_with("ValueError: too many values"));
    }

    #[test]
    fn test_errors_are_described() {
        assert_eq!(raised("undefined_name\n"), "NameError: name 'undefined_name' is not defined");
        assert_eq!(raised("raise ValueError('bad')\n"), "ValueError: bad");
    }

    #[test]
    fn test_runaway_recursion_is_bounded() {
        let message = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| raised("def f():\n    return f()\nf()\n"))
            .unwrap()
            .join()
            .unwrap();
        assert!(message.starts_with("RecursionError"));
    }

    #[test]
    fn test_generator_collect_and_advance() {
        let src = "\
def gen():
    yield 1
    yield 2
x = list(gen())
g = gen()
y = next(g)
";
        let (_, module) = run(src);
        assert_eq!(module.get("x").map(|v| v.repr()), Some("[1, 2]".to_string()));
        assert_eq!(module.get("y").map(|v| v.repr()), Some("1".to_string()));
    }

    #[test]
    fn test_unknown_modules_are_inert() {
        let src = "\
from mininet.topo import Topo
import some.unknown.module as m
x = m.anything(1).deeper['key']
class T(Topo):
    pass
y = T.__name__
";
        let (_, module) = run(src);
        assert!(matches!(module.get("x"), Some(Value::Inert)));
        assert_eq!(module.get("y").map(|v| v.repr()), Some("'T'".to_string()));
    }

    #[test]
    fn test_star_import_makes_names_lenient() {
        let src = "from lib.common_config import *\nx = start_topology\n";
        let (_, module) = run(src);
        assert!(matches!(module.get("x"), Some(Value::Inert)));
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, Some(1), None, 1), vec![1, 2, 3, 4]);
        assert_eq!(slice_indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, 1), vec![3, 4]);
        assert_eq!(slice_indices(3, Some(1), None, i64::MAX), vec![1]);
        assert_eq!(slice_span(5, Some(3), Some(1)), (3, 3));
        assert_eq!(slice_span(5, Some(i64::MIN), Some(i64::MAX)), (0, 5));
    }

    #[test]
    fn test_slice_assignment_and_delete() {
        let src = "\
a = [1, 2, 3, 4, 5]
a[1:3] = ['x']
b = [1, 2, 3, 4, 5]
del b[::2]
c = [1, 2, 3, 4]
c[::2] = [0, 0]
d = [1, 2, 3]
d[:] = []
e = [1, 2, 3]
del e[-1:]
";
        assert_eq!(global(src, "a"), "[1, 'x', 4, 5]");
        assert_eq!(global(src, "b"), "[2, 4]");
        assert_eq!(global(src, "c"), "[0, 2, 0, 4]");
        assert_eq!(global(src, "d"), "[]");
        assert_eq!(global(src, "e"), "[1, 2]");
        assert_eq!(
            raised("a = [1, 2, 3]\na[::2] = [0]\n"),
            "ValueError: attempt to assign sequence of size 1 to extended slice of size 2"
        );
    }

    #[parameterized(
        pow_past_64_bits = { "x = 2 ** 64", "OverflowError: 2 ** 64 does not fit in 64 bits" },
        left_shift_past_64_bits = { "x = 1 << 70", "OverflowError: 1 << 70 does not fit in 64 bits" },
        negative_shift = { "x = 1 << -1", "ValueError: negative shift count" },
        negative_right_shift = { "x = 8 >> -1", "ValueError: negative shift count" },
        min_floor_div = { "x = (-9223372036854775807 - 1) // -1", "OverflowError" },
        min_negate = { "x = -(-9223372036854775807 - 1)", "OverflowError" },
        min_abs = { "x = abs(-9223372036854775807 - 1)", "OverflowError" },
        sum_past_64_bits = { "x = 9223372036854775807 + 1", "OverflowError" },
        literal_past_64_bits = {
            "x = 9223372036854775808",
            "OverflowError: integer literal 9223372036854775808 does not fit in 64 bits"
        },
        zero_negative_power = { "x = 0 ** -1", "ZeroDivisionError" },
    )]
    fn test_integer_overflow_raises(src: &str, expected: &str) {
        let message = raised(&format!("{}\n", src));
        assert!(message.starts_with(expected), "{} gave {}", src, message);
    }

    #[test]
    fn test_integer_edges_stay_exact() {
        assert_eq!(global("x = -9223372036854775808\n", "x"), "-9223372036854775808");
        assert_eq!(global("x = 5 % 9223372036854775807\n", "x"), "5");
        assert_eq!(global("x = -5 % 9223372036854775807\n", "x"), "9223372036854775802");
        assert_eq!(global("x = (-9223372036854775807 - 1) % -1\n", "x"), "0");
        assert_eq!(global("x = 1 ** 9223372036854775807\n", "x"), "1");
        assert_eq!(global("x = (-1) ** 9223372036854775807\n", "x"), "-1");
        assert_eq!(global("x = 1 << 62\n", "x"), "4611686018427387904");
        assert_eq!(global("x = -1 >> 200\n", "x"), "-1");
        assert_eq!(global("x = 0x7fffffffffffffff\n", "x"), "9223372036854775807");
        assert_eq!(
            global("x = [i for i in range(0, 9223372036854775807, 4611686018427387904)]\n", "x"),
            "[0, 4611686018427387904]"
        );
        assert_eq!(
            global("x = list(range(9223372036854775806, -9223372036854775807 - 1, -9223372036854775807))\n", "x"),
            "[9223372036854775806, -1]"
        );
    }

    #[parameterized(
        repeat_str = { r#"x = "a" * 10000000000"#, "MemoryError" },
        repeat_str_max = { r#"x = "abc" * 9223372036854775807"#, "MemoryError" },
        repeat_list = { "x = [0] * 10000000000", "MemoryError" },
        repeat_tuple = { "x = (0,) * 10000000000", "MemoryError" },
        format_width = { r#"x = "{:>100000000000}".format("a")"#, "MemoryError" },
        percent_width = { r#"x = "%100000000000d" % 1"#, "MemoryError" },
        f_string_width = { r#"x = f"{'a':>100000000000}""#, "MemoryError" },
        builtin_format_width = { r#"x = format(1, "100000000000")"#, "MemoryError" },
        zfill = { "x = 'a'.zfill(10**11)", "MemoryError" },
        ljust = { "x = 'a'.ljust(10**11)", "MemoryError" },
        center = { "x = 'a'.center(10**11, '-')", "MemoryError" },
        percent_precision = { "x = '%.1000000000f' % 1.0", "ValueError: precision too big" },
        format_precision = { r#"x = "{:.1000000000f}".format(1.0)"#, "ValueError: precision too big" },
        bytes_count = { "x = bytes(10**11)", "MemoryError" },
    )]
    fn test_oversized_results_raise(src: &str, expected: &str) {
        let message = raised(&format!("{}\n", src));
        assert!(message.starts_with(expected), "{} gave {}", src, message);
    }

    #[test]
    fn test_bounded_sizes_still_work() {
        assert_eq!(global("x = len('ab' * 1000)\n", "x"), "2000");
        assert_eq!(global("x = '7'.zfill(3) + 'a'.rjust(3, '.')\n", "x"), "'007..a'");
        assert_eq!(global("x = '%5.2f' % 3.14159\n", "x"), "' 3.14'");
        assert_eq!(global("x = [1] * -3\n", "x"), "[]");
    }

    #[test]
    fn test_number_builtins() {
        assert_eq!(global("x = pow(2, 10)\n", "x"), "1024");
        assert_eq!(global("x = pow(3, 4, 5)\n", "x"), "1");
        assert_eq!(global("x = pow(3, -1, 7)\n", "x"), "5");
        assert_eq!(global("x = pow(2, 3, -5)\n", "x"), "-2");
        assert_eq!(global("x = pow(2, 0.5) > 1.41\n", "x"), "True");
        assert_eq!(global("x = [hex(255), hex(-255), oct(8), bin(5)]\n", "x"), "['0xff', '-0xff', '0o10', '0b101']");
        assert_eq!(global("x = len(bytes(3))\n", "x"), "3");
        assert_eq!(global("x = bytes([104, 105])\n", "x"), "'hi'");
        assert!(raised("x = pow(2, 3, 0)\n").starts_with("ValueError"));
        assert!(raised("x = pow(2, 64)\n").starts_with("OverflowError"));
        assert!(raised("x = bytes([300])\n").starts_with("ValueError"));
    }
}
