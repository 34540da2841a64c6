//! Runtime values of the interpreted Python subset

use super::ast::FunctionDef;
use super::framework::Topogen;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::{Rc, Weak};

pub type Scope = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(HashMap::new()))
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Function(Rc<Function>),
    Bound(Rc<Bound>),
    /// Builtin or framework function, dispatched by qualified name
    Builtin(&'static str),
    /// Method of a builtin type or framework object, dispatched by name
    Method(Rc<Method>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<ModuleObj>),
    Native(Rc<Native>),
    Generator(Rc<RefCell<Generator>>),
    Partial(Rc<Partial>),
    /// Stand-in for anything unmodeled: every access and call yields another
    Inert,
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(items: Vec<Value>) -> Value {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| py_eq(u, &item)) {
                unique.push(item);
            }
        }
        Value::Set(Rc::new(RefCell::new(unique)))
    }

    pub fn method(receiver: Value, name: &str) -> Value {
        Value::Method(Rc::new(Method {
            receiver,
            name: Rc::from(name),
        }))
    }

    pub fn native(native: Native) -> Value {
        Value::Native(Rc::new(native))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Bound(_)
                | Value::Builtin(_)
                | Value::Method(_)
                | Value::Class(_)
                | Value::Partial(_)
                | Value::Inert
        )
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Set(_) => "set".into(),
            Value::Function(_) | Value::Partial(_) => "function".into(),
            Value::Bound(_) | Value::Method(_) => "method".into(),
            Value::Builtin(_) => "builtin_function_or_method".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(i) => i.class.name.clone(),
            Value::Module(_) => "module".into(),
            Value::Native(n) => n.type_name().into(),
            Value::Generator(_) => "generator".into(),
            Value::Inert => "object".into(),
        }
    }

    /// `str()` of values that need no user code to render
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Instance(inst) if inst.class.is_exception() => exception_message(inst),
            other => other.repr(),
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote(s),
            Value::List(items) => format!("[{}]", join_repr(&items.borrow())),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Set(items) if items.borrow().is_empty() => "set()".into(),
            Value::Set(items) => format!("{{{}}}", join_repr(&items.borrow())),
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let mut out = String::from("{");
                for (i, (k, v)) in dict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}: {}", k.repr(), v.repr());
                }
                out.push('}');
                out
            }
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Bound(b) => format!("<bound method {}>", b.function.def.name),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Method(m) => format!("<method {}>", m.name),
            Value::Class(c) => format!("<class '{}'>", c.name),
            Value::Instance(inst) if inst.class.is_exception() => {
                format!("{}({})", inst.class.name, join_repr(&exception_args(inst)))
            }
            Value::Instance(inst) => format!("<{} object>", inst.class.name),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Native(n) => n.repr(),
            Value::Generator(_) => "<generator object>".into(),
            Value::Partial(_) => "functools.partial(...)".into(),
            Value::Inert => "<stand-in>".into(),
        }
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".into()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".into() } else { "-inf".into() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

pub fn exception_args(inst: &Instance) -> Vec<Value> {
    match inst.attrs.borrow().get("args") {
        Some(Value::Tuple(args)) => args.to_vec(),
        _ => Vec::new(),
    }
}

pub fn exception_message(inst: &Instance) -> String {
    let args = exception_args(inst);
    match args.as_slice() {
        [] => String::new(),
        [single] => single.to_display(),
        many => Value::tuple(many.to_vec()).repr(),
    }
}

/// Python `==` for values that need no user code
pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) | (Value::Inert, Value::Inert) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => a.as_int() == b.as_int(),
        (Value::List(x), Value::List(y)) => seq_eq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x, y),
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().all(|v| y.iter().any(|w| py_eq(v, w)))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| py_eq(v, &w)).unwrap_or(false))
        }
        _ => is_same(a, b),
    }
}

fn seq_eq(x: &[Value], y: &[Value]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(a, b)| py_eq(a, b))
}

/// Python `is`
pub fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Instance(x), Value::Instance(y)) => Rc::ptr_eq(x, y),
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y) || x.same_object(y),
        (Value::Generator(x), Value::Generator(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Python ordering for values that support `<`
pub fn py_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Some(a.as_int()?.cmp(&b.as_int()?))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => a.as_float()?.partial_cmp(&b.as_float()?),
        (Value::List(x), Value::List(y)) => seq_cmp(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
        _ => None,
    }
}

fn seq_cmp(x: &[Value], y: &[Value]) -> Option<Ordering> {
    for (a, b) in x.iter().zip(y) {
        if !py_eq(a, b) {
            return py_cmp(a, b);
        }
    }
    Some(x.len().cmp(&y.len()))
}

/// Insertion-ordered mapping with Python key equality
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut dict = Self::new();
        for (k, v) in pairs {
            dict.insert(k, v);
        }
        dict
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| py_eq(k, key))
            .map(|(_, v)| v.clone())
    }

    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| py_eq(k, key))
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| py_eq(k, &key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| py_eq(k, key))?;
        Some(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop()
    }
}

/// A user function together with its captured environment
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: Vec<Option<Value>>,
    /// Enclosing function scopes, innermost first
    pub closure: Vec<Scope>,
    pub globals: Rc<ModuleObj>,
    /// Class the function was defined in, for zero-argument `super()`
    pub owner: RefCell<Option<Weak<Class>>>,
}

pub struct Bound {
    pub receiver: Value,
    pub function: Rc<Function>,
}

pub struct Method {
    pub receiver: Value,
    pub name: Rc<str>,
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<HashMap<String, Value>>,
    /// Root of the builtin exception hierarchy is flagged here
    pub builtin_exception: bool,
}

impl Class {
    pub fn new(name: impl Into<String>, bases: Vec<Rc<Class>>) -> Self {
        Self {
            name: name.into(),
            bases,
            attrs: RefCell::new(HashMap::new()),
            builtin_exception: false,
        }
    }

    pub fn exception(name: impl Into<String>, bases: Vec<Rc<Class>>) -> Self {
        Self {
            builtin_exception: true,
            ..Self::new(name, bases)
        }
    }

    /// Attribute lookup through the class and its bases, depth first
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.attrs.borrow().get(name) {
            return Some(v.clone());
        }
        self.bases.iter().find_map(|b| b.lookup(name))
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        Rc::ptr_eq(self, other) || self.bases.iter().any(|b| b.is_subclass_of(other))
    }

    pub fn is_exception(&self) -> bool {
        self.builtin_exception || self.bases.iter().any(|b| b.is_exception())
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            attrs: RefCell::new(HashMap::new()),
        }
    }
}

/// A loaded module
pub struct ModuleObj {
    pub name: String,
    pub dict: Scope,
    /// Unknown names resolve to stand-ins instead of raising
    pub lenient: Cell<bool>,
}

impl ModuleObj {
    pub fn new(name: impl Into<String>, lenient: bool) -> Self {
        Self {
            name: name.into(),
            dict: new_scope(),
            lenient: Cell::new(lenient),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.dict.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.dict.borrow_mut().insert(name.to_string(), value);
    }
}

pub enum GeneratorState {
    /// Body not started; its bound locals are ready
    Fresh(Scope),
    /// Suspended after the first yield
    Suspended,
    Finished,
}

pub struct Generator {
    pub function: Rc<Function>,
    pub state: GeneratorState,
}

pub struct Partial {
    pub func: Value,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

/// Framework objects with modeled behavior
pub enum Native {
    Topogen(Rc<Topogen>),
    Gear(Rc<Topogen>, String),
    /// The `tgen.gears` mapping
    Gears(Rc<Topogen>),
    /// Attribute bag; unknown attributes are stand-ins
    Namespace(String, RefCell<HashMap<String, Value>>),
    Logger(String),
    /// Execution configuration with `getoption`
    Config,
    File(String, String),
    StaticMethod(Value),
    ClassMethod(Value),
    Super(Rc<Class>, Value),
}

impl Native {
    pub fn namespace(name: &str, attrs: Vec<(&str, Value)>) -> Native {
        Native::Namespace(
            name.to_string(),
            RefCell::new(
                attrs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Native::Topogen(_) => "Topogen",
            Native::Gear(tgen, name) => tgen.gear_type_name(name),
            Native::Gears(_) => "dict",
            Native::Namespace(..) => "namespace",
            Native::Logger(_) => "Logger",
            Native::Config => "Config",
            Native::File(..) => "TextIOWrapper",
            Native::StaticMethod(_) => "staticmethod",
            Native::ClassMethod(_) => "classmethod",
            Native::Super(..) => "super",
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Native::Gear(tgen, name) => format!("<{}: {}>", tgen.gear_type_name(name), name),
            Native::Namespace(name, _) => format!("<{}>", name),
            Native::Logger(name) => format!("<Logger {}>", name),
            Native::File(path, _) => format!("<file '{}'>", path),
            other => format!("<{} object>", other.type_name()),
        }
    }

    /// Gears are re-created on every access; compare them by identity
    fn same_object(&self, other: &Native) -> bool {
        match (self, other) {
            (Native::Gear(a, x), Native::Gear(b, y)) => Rc::ptr_eq(a, b) && x == y,
            (Native::Topogen(a), Native::Topogen(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_python() {
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("r1").repr(), "'r1'");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let dict = Dict::from_pairs([(Value::str("s1"), Value::list(vec![Value::None]))]);
        assert_eq!(Value::dict(dict).repr(), "{'s1': [None]}");
        assert_eq!(Value::set(Vec::new()).repr(), "set()");
    }

    #[test]
    fn test_equality_crosses_numeric_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::str("1"), &Value::Int(1)));
        assert!(py_eq(
            &Value::tuple(vec![Value::str("a"), Value::Int(2)]),
            &Value::tuple(vec![Value::str("a"), Value::Int(2)])
        ));
    }

    #[test]
    fn test_dict_keeps_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Value::str("r2"), Value::Int(2));
        dict.insert(Value::str("r1"), Value::Int(1));
        dict.insert(Value::str("r2"), Value::Int(3));

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.keys()[0].as_str(), Some("r2"));
        assert_eq!(dict.get_str("r2").and_then(|v| v.as_int()), Some(3));
        assert_eq!(dict.remove(&Value::str("r1")).and_then(|v| v.as_int()), Some(1));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(py_cmp(&Value::str("r10"), &Value::str("r2")), Some(Ordering::Less));
        assert_eq!(py_cmp(&Value::Int(3), &Value::Float(2.5)), Some(Ordering::Greater));
        assert_eq!(py_cmp(&Value::None, &Value::Int(1)), None);
    }

    #[test]
    fn test_set_deduplicates() {
        let set = Value::set(vec![Value::Int(1), Value::Int(1), Value::str("a")]);
        assert!(matches!(set, Value::Set(items) if items.borrow().len() == 2));
    }

    #[test]
    fn test_class_hierarchy() {
        let base = Rc::new(Class::exception("Exception", Vec::new()));
        let derived = Rc::new(Class::new("MyError", vec![base.clone()]));

        assert!(derived.is_subclass_of(&base));
        assert!(derived.is_exception());
        assert!(!base.is_subclass_of(&derived));
    }
}
