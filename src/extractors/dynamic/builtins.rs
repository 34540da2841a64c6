//! Builtin functions, builtin type methods and the exception hierarchy

use super::format;
use super::framework;
use super::interpreter::{Exec, Interpreter, Unwind};
use super::value::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// Upper bound on the length of a materialized `range`
pub const MAX_RANGE_ITEMS: i64 = 1_000_000;

const FUNCTIONS: &[&str] = &[
    "abs", "all", "any", "bin", "bool", "bytes", "callable", "chr", "classmethod", "dict", "divmod",
    "enumerate", "exit", "filter", "float", "format", "frozenset", "getattr", "hasattr", "hex", "int",
    "isinstance", "issubclass", "iter", "len", "list", "map", "max", "min", "next", "object", "oct",
    "open", "ord", "pow", "print", "property", "quit", "range", "repr", "reversed", "round", "set",
    "setattr", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "zip",
];

const HIERARCHY: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("SystemExit", "BaseException"),
    ("KeyboardInterrupt", "BaseException"),
    ("GeneratorExit", "BaseException"),
    ("Skipped", "BaseException"),
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("AssertionError", "Exception"),
    ("AttributeError", "Exception"),
    ("NameError", "Exception"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
    ("MemoryError", "Exception"),
    ("RuntimeError", "Exception"),
    ("RecursionError", "RuntimeError"),
    ("NotImplementedError", "RuntimeError"),
    ("LookupError", "Exception"),
    ("KeyError", "LookupError"),
    ("IndexError", "LookupError"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("OSError", "Exception"),
    ("FileNotFoundError", "OSError"),
    ("FileExistsError", "OSError"),
    ("PermissionError", "OSError"),
    ("TimeoutError", "OSError"),
    ("StopIteration", "Exception"),
    ("SyntaxError", "Exception"),
    ("CalledProcessError", "Exception"),
];

pub fn exception_classes() -> HashMap<String, Rc<Class>> {
    let mut classes: HashMap<String, Rc<Class>> = HashMap::new();
    for (name, base) in HIERARCHY {
        let bases = classes.get(*base).cloned().into_iter().collect();
        classes.insert(name.to_string(), Rc::new(Class::exception(*name, bases)));
    }
    classes
}

/// The builtins namespace every module falls back to
pub fn scope(exceptions: &HashMap<String, Rc<Class>>) -> Scope {
    let scope = new_scope();
    {
        let mut names = scope.borrow_mut();
        for name in FUNCTIONS {
            names.insert(name.to_string(), Value::Builtin(*name));
        }
        for (name, class) in exceptions {
            if name != "Skipped" && name != "CalledProcessError" {
                names.insert(name.clone(), Value::Class(class.clone()));
            }
        }
        if let Some(os_error) = exceptions.get("OSError") {
            for alias in ["IOError", "EnvironmentError"] {
                names.insert(alias.to_string(), Value::Class(os_error.clone()));
            }
        }
    }
    scope
}

/// Positional argument `index`, or keyword `name`
pub fn arg(args: &[Value], kwargs: &[(String, Value)], index: usize, name: &str) -> Option<Value> {
    args.get(index)
        .cloned()
        .or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()))
}

pub fn required(
    interp: &Interpreter,
    args: &[Value],
    kwargs: &[(String, Value)],
    index: usize,
    name: &str,
    function: &str,
) -> Exec<Value> {
    arg(args, kwargs, index, name).ok_or_else(|| {
        interp.raise(
            "TypeError",
            format!("{}() missing required argument '{}'", function, name),
        )
    })
}

fn string_arg(interp: &mut Interpreter, value: Option<Value>, function: &str) -> Exec<String> {
    match value {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(interp.raise(
            "TypeError",
            format!("{}() argument must be str, not {}", function, other.type_name()),
        )),
        None => Err(interp.raise("TypeError", format!("{}() missing required argument", function))),
    }
}

pub fn call(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
    match name {
        "print" => {
            let sep = arg(&[], &kwargs, 0, "sep")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| " ".to_string());
            let mut parts = Vec::with_capacity(args.len());
            for value in &args {
                parts.push(interp.to_str(value)?);
            }
            interp.env().log("print", "info", &parts.join(&sep));
            Ok(Value::None)
        }
        "len" => {
            let value = required(interp, &args, &kwargs, 0, "obj", name)?;
            length(interp, &value).map(|n| Value::Int(n as i64))
        }
        "str" => match args.first() {
            None => Ok(Value::str("")),
            Some(value) => Ok(Value::str(interp.to_str(value)?)),
        },
        "repr" => {
            let value = required(interp, &args, &kwargs, 0, "obj", name)?;
            Ok(Value::str(interp.repr_value(&value)?))
        }
        "int" => to_int(interp, &args, &kwargs),
        "float" => match args.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| interp.raise("ValueError", format!("could not convert string to float: {}", quote_str(s)))),
            Some(Value::Inert) => Ok(Value::Inert),
            Some(value) => match value.as_float() {
                Some(f) => Ok(Value::Float(f)),
                None => Err(interp.raise(
                    "TypeError",
                    format!("float() argument must be a string or a number, not '{}'", value.type_name()),
                )),
            },
        },
        "bool" => Ok(Value::Bool(args.first().is_some_and(Value::truthy))),
        "list" => match args.first() {
            None => Ok(Value::list(Vec::new())),
            Some(value) => Ok(Value::list(interp.iterate(value)?)),
        },
        "tuple" => match args.first() {
            None => Ok(Value::tuple(Vec::new())),
            Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
        },
        "set" | "frozenset" => match args.first() {
            None => Ok(Value::set(Vec::new())),
            Some(value) => Ok(Value::set(interp.iterate(value)?)),
        },
        "dict" => {
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                match source {
                    Value::Dict(other) => {
                        for (k, v) in other.borrow().iter() {
                            dict.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        for item in interp.iterate(other)? {
                            let pair = interp.iterate(&item)?;
                            match pair.as_slice() {
                                [k, v] => dict.insert(k.clone(), v.clone()),
                                _ => {
                                    return Err(interp.raise(
                                        "ValueError",
                                        "dictionary update sequence element has wrong length",
                                    ))
                                }
                            }
                        }
                    }
                }
            }
            for (k, v) in kwargs {
                dict.insert(Value::str(k), v);
            }
            Ok(Value::dict(dict))
        }
        "range" => range(interp, &args),
        "enumerate" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let start = arg(&args, &kwargs, 1, "start").and_then(|v| v.as_int()).unwrap_or(0);
            let items = interp.iterate(&iterable)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start.saturating_add(i as i64)), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let mut columns = Vec::with_capacity(args.len());
            for value in &args {
                columns.push(interp.iterate(value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "sorted" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let items = interp.iterate(&iterable)?;
            let key = arg(&[], &kwargs, 0, "key");
            let reverse = arg(&[], &kwargs, 0, "reverse").is_some_and(|v| v.truthy());
            Ok(Value::list(sort_values(interp, items, key, reverse)?))
        }
        "reversed" => {
            let iterable = required(interp, &args, &kwargs, 0, "sequence", name)?;
            let mut items = interp.iterate(&iterable)?;
            items.reverse();
            Ok(Value::list(items))
        }
        "min" | "max" => extreme(interp, name, args, &kwargs),
        "sum" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let mut total = arg(&args, &kwargs, 1, "start").unwrap_or(Value::Int(0));
            for item in interp.iterate(&iterable)? {
                total = interp.binop(super::ast::BinOp::Add, total, item)?;
            }
            Ok(total)
        }
        "abs" => match required(interp, &args, &kwargs, 0, "x", name)? {
            Value::Float(f) => Ok(Value::Float(f.abs())),
            value => match value.as_int() {
                Some(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| interp.raise("OverflowError", "abs() result does not fit in 64 bits")),
                None => Err(interp.raise(
                    "TypeError",
                    format!("bad operand type for abs(): '{}'", value.type_name()),
                )),
            },
        },
        "any" | "all" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let items = interp.iterate(&iterable)?;
            Ok(Value::Bool(if name == "any" {
                items.iter().any(Value::truthy)
            } else {
                items.iter().all(Value::truthy)
            }))
        }
        "isinstance" => {
            let object = required(interp, &args, &kwargs, 0, "obj", name)?;
            let class = required(interp, &args, &kwargs, 1, "class_or_tuple", name)?;
            Ok(Value::Bool(is_instance(&object, &class)))
        }
        "issubclass" => {
            let class = required(interp, &args, &kwargs, 0, "cls", name)?;
            let parent = required(interp, &args, &kwargs, 1, "class_or_tuple", name)?;
            Ok(Value::Bool(is_subclass(&class, &parent)))
        }
        "hasattr" => {
            let object = required(interp, &args, &kwargs, 0, "obj", name)?;
            let attr = string_arg(interp, args.get(1).cloned(), name)?;
            match interp.get_attr(&object, &attr) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(Unwind::Raise(exc)) if interp.is_exception_of(&exc, "AttributeError") => Ok(Value::Bool(false)),
                Err(other) => Err(other),
            }
        }
        "getattr" => {
            let object = required(interp, &args, &kwargs, 0, "obj", name)?;
            let attr = string_arg(interp, args.get(1).cloned(), name)?;
            match (interp.get_attr(&object, &attr), args.get(2)) {
                (Err(Unwind::Raise(exc)), Some(default)) if interp.is_exception_of(&exc, "AttributeError") => {
                    Ok(default.clone())
                }
                (result, _) => result,
            }
        }
        "setattr" => {
            let object = required(interp, &args, &kwargs, 0, "obj", name)?;
            let attr = string_arg(interp, args.get(1).cloned(), name)?;
            let value = required(interp, &args, &kwargs, 2, "value", name)?;
            interp.set_attr(&object, &attr, value)?;
            Ok(Value::None)
        }
        "type" => {
            let object = required(interp, &args, &kwargs, 0, "obj", name)?;
            Ok(type_of(&object))
        }
        "map" => {
            let function = required(interp, &args, &kwargs, 0, "func", name)?;
            let mut columns = Vec::new();
            for value in args.iter().skip(1) {
                columns.push(interp.iterate(value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call(&function, call_args, Vec::new())?);
            }
            Ok(Value::list(out))
        }
        "filter" => {
            let function = required(interp, &args, &kwargs, 0, "function", name)?;
            let iterable = required(interp, &args, &kwargs, 1, "iterable", name)?;
            let mut out = Vec::new();
            for item in interp.iterate(&iterable)? {
                let keep = if function.is_none() {
                    item.truthy()
                } else {
                    interp.call(&function, vec![item.clone()], Vec::new())?.truthy()
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "next" => {
            let iterator = required(interp, &args, &kwargs, 0, "iterator", name)?;
            let result = next_value(interp, &iterator);
            match (result, args.get(1)) {
                (Err(Unwind::Raise(exc)), Some(default)) if interp.is_exception_of(&exc, "StopIteration") => {
                    Ok(default.clone())
                }
                (result, _) => result,
            }
        }
        "iter" => match required(interp, &args, &kwargs, 0, "object", name)? {
            generator @ Value::Generator(_) => Ok(generator),
            other => Ok(Value::list(interp.iterate(&other)?)),
        },
        "open" => open(interp, &args, &kwargs),
        "ord" => {
            let text = string_arg(interp, args.first().cloned(), name)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(interp.raise("TypeError", "ord() expected a character")),
            }
        }
        "chr" => {
            let code = required(interp, &args, &kwargs, 0, "i", name)?;
            match code.as_int().and_then(|n| u32::try_from(n).ok()).and_then(char::from_u32) {
                Some(c) => Ok(Value::str(c.to_string())),
                None => Err(interp.raise("ValueError", "chr() arg not in range(0x110000)")),
            }
        }
        "round" => {
            let number = required(interp, &args, &kwargs, 0, "number", name)?;
            let digits = arg(&args, &kwargs, 1, "ndigits").and_then(|v| v.as_int());
            match (&number, digits) {
                (Value::Float(f), None) => Ok(Value::Int(round_half_even(*f) as i64)),
                (Value::Float(f), Some(d)) => {
                    let factor = 10f64.powi(d as i32);
                    Ok(Value::Float(round_half_even(f * factor) / factor))
                }
                _ => Ok(number),
            }
        }
        "pow" => {
            let base = required(interp, &args, &kwargs, 0, "base", name)?;
            let exp = required(interp, &args, &kwargs, 1, "exp", name)?;
            match arg(&args, &kwargs, 2, "mod").filter(|m| !m.is_none()) {
                None => interp.binop(super::ast::BinOp::Pow, base, exp),
                Some(modulus) => match (base.as_int(), exp.as_int(), modulus.as_int()) {
                    (Some(base), Some(exp), Some(modulus)) => Ok(Value::Int(mod_pow(interp, base, exp, modulus)?)),
                    _ => Err(interp.raise(
                        "TypeError",
                        "pow() 3rd argument not allowed unless all arguments are integers",
                    )),
                },
            }
        }
        "hex" | "oct" | "bin" => {
            let value = required(interp, &args, &kwargs, 0, "number", name)?;
            let Some(n) = value.as_int() else {
                return Err(interp.raise(
                    "TypeError",
                    format!("'{}' object cannot be interpreted as an integer", value.type_name()),
                ));
            };
            let magnitude = n.unsigned_abs();
            let digits = match name {
                "hex" => format!("0x{:x}", magnitude),
                "oct" => format!("0o{:o}", magnitude),
                _ => format!("0b{:b}", magnitude),
            };
            Ok(Value::str(if n < 0 { format!("-{}", digits) } else { digits }))
        }
        "bytes" => bytes(interp, &args),
        "divmod" => {
            let a = required(interp, &args, &kwargs, 0, "a", name)?;
            let b = required(interp, &args, &kwargs, 1, "b", name)?;
            let quotient = interp.binop(super::ast::BinOp::FloorDiv, a.clone(), b.clone())?;
            let remainder = interp.binop(super::ast::BinOp::Mod, a, b)?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        "callable" => Ok(Value::Bool(
            args.first().is_some_and(|v| v.is_callable() || matches!(v, Value::Instance(i) if i.class.lookup("__call__").is_some())),
        )),
        "format" => {
            let value = required(interp, &args, &kwargs, 0, "value", name)?;
            let spec = arg(&args, &kwargs, 1, "format_spec")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            Ok(Value::str(format::format_spec(interp, &value, &spec)?))
        }
        "super" => match (args.first(), args.get(1)) {
            (Some(Value::Class(class)), Some(receiver)) => {
                Ok(Value::native(Native::Super(class.clone(), receiver.clone())))
            }
            _ => Err(interp.raise("RuntimeError", "super(): no arguments")),
        },
        "staticmethod" => Ok(Value::native(Native::StaticMethod(
            required(interp, &args, &kwargs, 0, "function", name)?,
        ))),
        "classmethod" => Ok(Value::native(Native::ClassMethod(
            required(interp, &args, &kwargs, 0, "function", name)?,
        ))),
        "property" => Ok(Value::Inert),
        "object" => Ok(Value::native(Native::namespace("object", Vec::new()))),
        "exit" | "quit" => Err(Unwind::Raise(interp.new_exception("SystemExit", args))),
        _ => framework::call(interp, name, args, kwargs),
    }
}

/// `pow(base, exp, mod)` with Python's sign of the result
fn mod_pow(interp: &Interpreter, base: i64, exp: i64, modulus: i64) -> Exec<i64> {
    if modulus == 0 {
        return Err(interp.raise("ValueError", "pow() 3rd argument cannot be 0"));
    }
    let m = i128::from(modulus);
    let mut base = i128::from(base).rem_euclid(m.abs());
    if exp < 0 {
        base = mod_inverse(base, m.abs())
            .ok_or_else(|| interp.raise("ValueError", "base is not invertible for the given modulus"))?;
    }
    let mut exp = exp.unsigned_abs();
    let mut result = 1i128.rem_euclid(m.abs());
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m.abs();
        }
        base = base * base % m.abs();
        exp >>= 1;
    }
    // the result takes the sign of the modulus
    if m < 0 && result != 0 {
        result += m;
    }
    Ok(result as i64)
}

fn mod_inverse(a: i128, m: i128) -> Option<i128> {
    let (mut old_r, mut r) = (a, m);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }
    (old_r == 1).then(|| old_s.rem_euclid(m))
}

/// Bytes are modeled as text with one char per byte
fn bytes(interp: &mut Interpreter, args: &[Value]) -> Exec<Value> {
    match args.first() {
        None => Ok(Value::str("")),
        Some(Value::Str(s)) => Ok(Value::Str(s.clone())),
        Some(Value::Int(n)) => {
            if *n < 0 {
                return Err(interp.raise("ValueError", "negative count"));
            }
            let len = interp.repeated_len(1, *n)?;
            Ok(Value::str("\0".repeat(len)))
        }
        Some(value) => {
            let mut out = String::new();
            for item in interp.iterate(value)? {
                match item.as_int().and_then(|n| u8::try_from(n).ok()) {
                    Some(byte) => out.push(char::from(byte)),
                    None => return Err(interp.raise("ValueError", "bytes must be in range(0, 256)")),
                }
            }
            Ok(Value::str(out))
        }
    }
}

fn quote_str(s: &str) -> String {
    Value::str(s).repr()
}

fn round_half_even(f: f64) -> f64 {
    let rounded = f.round();
    if (f - f.trunc()).abs() == 0.5 {
        2.0 * (f / 2.0).round()
    } else {
        rounded
    }
}

fn to_int(interp: &mut Interpreter, args: &[Value], kwargs: &[(String, Value)]) -> Exec<Value> {
    match args.first() {
        None => Ok(Value::Int(0)),
        Some(Value::Str(s)) => {
            let base = arg(args, kwargs, 1, "base").and_then(|v| v.as_int()).unwrap_or(10);
            parse_int(s, base as u32).map(Value::Int).ok_or_else(|| {
                interp.raise(
                    "ValueError",
                    format!("invalid literal for int() with base {}: {}", base, quote_str(s)),
                )
            })
        }
        Some(Value::Float(f)) => {
            if f.is_finite() {
                Ok(Value::Int(f.trunc() as i64))
            } else {
                Err(interp.raise("OverflowError", "cannot convert float infinity or NaN to integer"))
            }
        }
        Some(Value::Inert) => Ok(Value::Inert),
        Some(value) => match value.as_int() {
            Some(n) => Ok(Value::Int(n)),
            None => Err(interp.raise(
                "TypeError",
                format!(
                    "int() argument must be a string or a number, not '{}'",
                    value.type_name()
                ),
            )),
        },
    }
}

/// Python `int(text, base)` parsing
pub fn parse_int(text: &str, base: u32) -> Option<i64> {
    let trimmed = text.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, trimmed.trim_start_matches('+').to_string()),
    };
    let lower = digits.to_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..]),
        (0 | 8, Some("0o")) => (8, &digits[2..]),
        (0 | 2, Some("0b")) => (2, &digits[2..]),
        (0, _) => (10, digits.as_str()),
        (base, _) => (base, digits.as_str()),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_alphanumeric()) || !(2..=36).contains(&base) {
        return None;
    }
    if negative {
        i64::from_str_radix(&format!("-{}", digits), base).ok()
    } else {
        i64::from_str_radix(digits, base).ok()
    }
}

fn range(interp: &mut Interpreter, args: &[Value]) -> Exec<Value> {
    let ints: Option<Vec<i64>> = args.iter().map(Value::as_int).collect();
    let Some(ints) = ints else {
        return Err(interp.raise("TypeError", "range() arguments must be integers"));
    };
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(interp.raise("TypeError", "range expected 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(interp.raise("ValueError", "range() arg 3 must not be zero"));
    }
    // i128 keeps the span of any two i64 bounds exact
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 {
        (stop - start + step - 1).max(0) / step
    } else {
        (start - stop - step - 1).max(0) / -step
    };
    if count > MAX_RANGE_ITEMS as i128 {
        return Err(interp.raise("RuntimeError", "range is too large to materialize"));
    }
    Ok(Value::list(
        (0..count).map(|i| Value::Int((start + i * step) as i64)).collect(),
    ))
}

fn extreme(interp: &mut Interpreter, name: &str, args: Vec<Value>, kwargs: &[(String, Value)]) -> Exec<Value> {
    let items = match args.as_slice() {
        [single] => interp.iterate(single)?,
        _ => args,
    };
    if items.is_empty() {
        return match arg(&[], kwargs, 0, "default") {
            Some(default) => Ok(default),
            None => Err(interp.raise("ValueError", format!("{}() arg is an empty sequence", name))),
        };
    }
    let keys = match arg(&[], kwargs, 0, "key") {
        Some(key) if !key.is_none() => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(interp.call(&key, vec![item.clone()], Vec::new())?);
            }
            keys
        }
        _ => items.clone(),
    };
    let wanted = if name == "max" { Ordering::Greater } else { Ordering::Less };
    let mut best = 0;
    for i in 1..items.len() {
        match py_cmp(&keys[i], &keys[best]) {
            Some(ordering) if ordering == wanted => best = i,
            Some(_) => {}
            None => {
                return Err(interp.raise(
                    "TypeError",
                    format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        keys[i].type_name(),
                        keys[best].type_name()
                    ),
                ))
            }
        }
    }
    Ok(items[best].clone())
}

/// Stable sort with an optional key function
pub fn sort_values(interp: &mut Interpreter, items: Vec<Value>, key: Option<Value>, reverse: bool) -> Exec<Vec<Value>> {
    let keys = match key {
        Some(key) if !key.is_none() => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(interp.call(&key, vec![item.clone()], Vec::new())?);
            }
            keys
        }
        _ => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut incomparable = None;
    order.sort_by(|&a, &b| {
        let (x, y) = if reverse { (&keys[b], &keys[a]) } else { (&keys[a], &keys[b]) };
        py_cmp(x, y).unwrap_or_else(|| {
            incomparable.get_or_insert((x.type_name(), y.type_name()));
            Ordering::Equal
        })
    });
    if let Some((a, b)) = incomparable {
        return Err(interp.raise(
            "TypeError",
            format!("'<' not supported between instances of '{}' and '{}'", a, b),
        ));
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn length(interp: &mut Interpreter, value: &Value) -> Exec<usize> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) | Value::Set(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Native(_) => Ok(interp.iterate(value)?.len()),
        Value::Instance(inst) if inst.class.lookup("__len__").is_some() => {
            let method = interp.get_attr(value, "__len__")?;
            let n = interp.call(&method, Vec::new(), Vec::new())?;
            Ok(n.as_int().unwrap_or(0).max(0) as usize)
        }
        Value::Inert => Ok(0),
        other => Err(interp.raise(
            "TypeError",
            format!("object of type '{}' has no len()", other.type_name()),
        )),
    }
}

pub fn is_instance(object: &Value, class: &Value) -> bool {
    match class {
        Value::Tuple(classes) => classes.iter().any(|c| is_instance(object, c)),
        Value::Class(class) => matches!(object, Value::Instance(inst) if inst.class.is_subclass_of(class)),
        Value::Builtin(name) => match *name {
            "str" => matches!(object, Value::Str(_)),
            "int" => matches!(object, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(object, Value::Float(_)),
            "bool" => matches!(object, Value::Bool(_)),
            "list" => matches!(object, Value::List(_)),
            "tuple" => matches!(object, Value::Tuple(_)),
            "dict" => matches!(object, Value::Dict(_)),
            "set" | "frozenset" => matches!(object, Value::Set(_)),
            "object" => true,
            other => framework::is_instance(object, other),
        },
        _ => false,
    }
}

fn is_subclass(class: &Value, parent: &Value) -> bool {
    match (class, parent) {
        (_, Value::Tuple(parents)) => parents.iter().any(|p| is_subclass(class, p)),
        (Value::Class(a), Value::Class(b)) => a.is_subclass_of(b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b || (*a == "bool" && *b == "int") || *b == "object",
        _ => false,
    }
}

fn type_of(value: &Value) -> Value {
    match value {
        Value::Instance(inst) => Value::Class(inst.class.clone()),
        Value::Str(_) => Value::Builtin("str"),
        Value::Int(_) => Value::Builtin("int"),
        Value::Float(_) => Value::Builtin("float"),
        Value::Bool(_) => Value::Builtin("bool"),
        Value::List(_) => Value::Builtin("list"),
        Value::Tuple(_) => Value::Builtin("tuple"),
        Value::Dict(_) => Value::Builtin("dict"),
        Value::Set(_) => Value::Builtin("set"),
        Value::Inert => Value::Inert,
        _ => Value::Builtin("object"),
    }
}

fn next_value(interp: &mut Interpreter, iterator: &Value) -> Exec<Value> {
    match iterator {
        Value::Generator(generator) => {
            let generator = generator.clone();
            interp.advance(&generator)
        }
        // lists handed out by iter() act as consuming iterators
        Value::List(items) => {
            if items.borrow().is_empty() {
                Err(interp.raise("StopIteration", ""))
            } else {
                Ok(items.borrow_mut().remove(0))
            }
        }
        Value::Instance(inst) if inst.class.lookup("__next__").is_some() => {
            let method = interp.get_attr(iterator, "__next__")?;
            interp.call(&method, Vec::new(), Vec::new())
        }
        Value::Inert => Ok(Value::Inert),
        other => Err(interp.raise(
            "TypeError",
            format!("'{}' object is not an iterator", other.type_name()),
        )),
    }
}

fn open(interp: &mut Interpreter, args: &[Value], kwargs: &[(String, Value)]) -> Exec<Value> {
    let path = match arg(args, kwargs, 0, "file") {
        Some(value) => interp.to_str(&value)?,
        None => return Err(interp.raise("TypeError", "open() missing required argument 'file'")),
    };
    let mode = arg(args, kwargs, 1, "mode")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "r".to_string());
    let resolved = if path.starts_with('/') {
        path.clone()
    } else {
        format!("{}/{}", interp.source_dir(), path)
    };
    if mode.contains(['w', 'a', 'x']) {
        return Ok(Value::native(Native::File(resolved, String::new())));
    }
    match interp.env().read_file(&resolved) {
        Some(content) => Ok(Value::native(Native::File(resolved, content))),
        None => Err(interp.raise(
            "FileNotFoundError",
            format!("[Errno 2] No such file or directory: {}", quote_str(&path)),
        )),
    }
}

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "decode", "encode", "endswith", "find", "format", "index",
    "isalnum", "isalpha", "isdigit", "islower", "isspace", "isupper", "join", "ljust", "lower",
    "lstrip", "partition", "replace", "rfind", "rjust", "rpartition", "rsplit", "rstrip", "split",
    "splitlines", "startswith", "strip", "title", "upper", "zfill",
];
const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];
const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "issubset", "pop", "remove",
    "union", "update",
];

pub fn has_method(value: &Value, name: &str) -> bool {
    let table: &[&str] = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => &["count", "index"],
        Value::Int(_) | Value::Bool(_) => &["bit_length"],
        Value::Float(_) => &["is_integer"],
        _ => &[],
    };
    table.contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(items) => list_method(interp, receiver, items, name, args, kwargs),
        Value::Dict(dict) => dict_method(interp, dict, name, args, kwargs),
        Value::Set(items) => set_method(interp, items, name, args),
        Value::Tuple(items) => match name {
            "count" => {
                let needle = required(interp, &args, &kwargs, 0, "value", name)?;
                Ok(Value::Int(items.iter().filter(|v| py_eq(v, &needle)).count() as i64))
            }
            "index" => {
                let needle = required(interp, &args, &kwargs, 0, "value", name)?;
                match items.iter().position(|v| py_eq(v, &needle)) {
                    Some(i) => Ok(Value::Int(i as i64)),
                    None => Err(interp.raise("ValueError", "tuple.index(x): x not in tuple")),
                }
            }
            _ => Err(no_method(interp, receiver, name)),
        },
        Value::Int(_) | Value::Bool(_) if name == "bit_length" => {
            let n = receiver.as_int().unwrap_or(0);
            Ok(Value::Int(64 - n.unsigned_abs().leading_zeros() as i64))
        }
        Value::Float(f) if name == "is_integer" => Ok(Value::Bool(f.fract() == 0.0)),
        Value::Generator(generator) => match name {
            "__next__" | "send" => {
                let generator = generator.clone();
                interp.advance(&generator)
            }
            _ => Ok(Value::None),
        },
        Value::Instance(inst) if name == "__init__" => {
            if inst.class.is_exception() {
                inst.attrs
                    .borrow_mut()
                    .insert("args".to_string(), Value::tuple(args));
            }
            Ok(Value::None)
        }
        Value::Native(native) => {
            let native = native.clone();
            framework::call_method(interp, receiver, &native, name, args, kwargs)
        }
        _ => Err(no_method(interp, receiver, name)),
    }
}

fn no_method(interp: &Interpreter, receiver: &Value, name: &str) -> Unwind {
    interp.raise(
        "AttributeError",
        format!("'{}' object has no attribute '{}'", receiver.type_name(), name),
    )
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn strip_chars<'a>(s: &'a str, chars: Option<&Value>, left: bool, right: bool) -> &'a str {
    let set: Option<Vec<char>> = chars.and_then(|v| v.as_str()).map(|c| c.chars().collect());
    let matches = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let s = if left { s.trim_start_matches(matches) } else { s };
    if right {
        s.trim_end_matches(matches)
    } else {
        s
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && out.len() as i64 == maxsplit {
            out.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                out.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                out.push(Value::str(rest));
                break;
            }
        }
    }
    out
}

fn justify(interp: &Interpreter, s: &str, args: &[Value], align: char) -> Exec<Value> {
    let width = args.first().and_then(Value::as_int).unwrap_or(0).max(0) as usize;
    let fill = match args.get(1).and_then(Value::as_str) {
        Some(f) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
        Some(_) => return Err(interp.raise("TypeError", "The fill character must be exactly one character long")),
        None => ' ',
    };
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::str(s));
    }
    let padding = interp.check_width(width)? - len;
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(Value::str(match align {
        '<' => format!("{}{}", s, fill_str(padding)),
        '>' => format!("{}{}", fill_str(padding), s),
        _ => {
            let left = padding / 2 + (padding & width & 1);
            format!("{}{}{}", fill_str(left), s, fill_str(padding - left))
        }
    }))
}

fn str_method(
    interp: &mut Interpreter,
    s: &Rc<str>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    let text: &str = s;
    match name {
        "format" => Ok(Value::str(format::str_format(interp, text, &args, &kwargs)?)),
        "join" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let mut parts = Vec::new();
            for item in interp.iterate(&iterable)? {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(interp.raise(
                            "TypeError",
                            format!("sequence item: expected str instance, {} found", other.type_name()),
                        ))
                    }
                }
            }
            Ok(Value::str(parts.join(text)))
        }
        "split" | "rsplit" => {
            let sep = arg(&args, &kwargs, 0, "sep").filter(|v| !v.is_none());
            let maxsplit = arg(&args, &kwargs, 1, "maxsplit").and_then(|v| v.as_int()).unwrap_or(-1);
            match sep {
                None => Ok(Value::list(split_whitespace(text, maxsplit))),
                Some(Value::Str(sep)) if sep.is_empty() => Err(interp.raise("ValueError", "empty separator")),
                Some(Value::Str(sep)) => {
                    let parts: Vec<Value> = match (name, maxsplit) {
                        (_, n) if n < 0 => text.split(&*sep).map(Value::str).collect(),
                        ("split", n) => text.splitn(n as usize + 1, &*sep).map(Value::str).collect(),
                        (_, n) => {
                            let mut parts: Vec<Value> = text.rsplitn(n as usize + 1, &*sep).map(Value::str).collect();
                            parts.reverse();
                            parts
                        }
                    };
                    Ok(Value::list(parts))
                }
                Some(other) => Err(interp.raise(
                    "TypeError",
                    format!("must be str or None, not {}", other.type_name()),
                )),
            }
        }
        "strip" => Ok(Value::str(strip_chars(text, args.first(), true, true))),
        "lstrip" => Ok(Value::str(strip_chars(text, args.first(), true, false))),
        "rstrip" => Ok(Value::str(strip_chars(text, args.first(), false, true))),
        "startswith" | "endswith" => {
            let prefix = required(interp, &args, &kwargs, 0, "prefix", name)?;
            let candidates: Vec<Value> = match prefix {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other],
            };
            let mut result = false;
            for candidate in &candidates {
                let Some(candidate) = candidate.as_str() else {
                    return Err(interp.raise("TypeError", format!("{} arg must be str or a tuple of str", name)));
                };
                result |= if name == "startswith" {
                    text.starts_with(candidate)
                } else {
                    text.ends_with(candidate)
                };
            }
            Ok(Value::Bool(result))
        }
        "replace" => {
            let old = string_arg(interp, args.first().cloned(), name)?;
            let new = string_arg(interp, args.get(1).cloned(), name)?;
            let count = args.get(2).and_then(Value::as_int).unwrap_or(-1);
            Ok(Value::str(if count < 0 {
                text.replace(&old, &new)
            } else {
                text.replacen(&old, &new, count as usize)
            }))
        }
        "lower" => Ok(Value::str(text.to_lowercase())),
        "upper" => Ok(Value::str(text.to_uppercase())),
        "capitalize" => {
            let mut chars = text.chars();
            Ok(Value::str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            }))
        }
        "title" => {
            let mut out = String::with_capacity(text.len());
            let mut boundary = true;
            for c in text.chars() {
                if c.is_alphabetic() {
                    if boundary {
                        out.extend(c.to_uppercase());
                    } else {
                        out.extend(c.to_lowercase());
                    }
                    boundary = false;
                } else {
                    out.push(c);
                    boundary = true;
                }
            }
            Ok(Value::str(out))
        }
        "find" | "rfind" | "index" => {
            let needle = string_arg(interp, args.first().cloned(), name)?;
            let found = if name == "rfind" { text.rfind(&needle) } else { text.find(&needle) };
            match (found, name) {
                (Some(byte), _) => Ok(Value::Int(char_index(text, byte))),
                (None, "index") => Err(interp.raise("ValueError", "substring not found")),
                (None, _) => Ok(Value::Int(-1)),
            }
        }
        "count" => {
            let needle = string_arg(interp, args.first().cloned(), name)?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(&needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "isdigit" => Ok(Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))),
        "isupper" => Ok(Value::Bool(
            text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase),
        )),
        "islower" => Ok(Value::Bool(
            text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_uppercase),
        )),
        "zfill" => {
            let width = args.first().and_then(Value::as_int).unwrap_or(0).max(0) as usize;
            let len = text.chars().count();
            if len >= width {
                return Ok(Value::str(text));
            }
            let zeros = "0".repeat(interp.check_width(width)? - len);
            Ok(Value::str(match text.chars().next() {
                Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, zeros, &text[1..]),
                _ => format!("{}{}", zeros, text),
            }))
        }
        "ljust" => justify(interp, text, &args, '<'),
        "rjust" => justify(interp, text, &args, '>'),
        "center" => justify(interp, text, &args, '^'),
        "splitlines" => Ok(Value::list(text.lines().map(Value::str).collect())),
        "partition" | "rpartition" => {
            let sep = string_arg(interp, args.first().cloned(), name)?;
            if sep.is_empty() {
                return Err(interp.raise("ValueError", "empty separator"));
            }
            let split = if name == "partition" { text.split_once(&sep) } else { text.rsplit_once(&sep) };
            Ok(Value::tuple(match (split, name) {
                (Some((before, after)), _) => vec![Value::str(before), Value::str(&sep), Value::str(after)],
                (None, "partition") => vec![Value::str(text), Value::str(""), Value::str("")],
                (None, _) => vec![Value::str(""), Value::str(""), Value::str(text)],
            }))
        }
        "encode" | "decode" => Ok(Value::Str(s.clone())),
        _ => Err(no_method(interp, &Value::Str(s.clone()), name)),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    match name {
        "append" => {
            let value = required(interp, &args, &kwargs, 0, "object", name)?;
            items.borrow_mut().push(value);
            Ok(Value::None)
        }
        "extend" => {
            let iterable = required(interp, &args, &kwargs, 0, "iterable", name)?;
            let extra = interp.iterate(&iterable)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let index = required(interp, &args, &kwargs, 0, "index", name)?.as_int().unwrap_or(0);
            let value = required(interp, &args, &kwargs, 1, "object", name)?;
            let len = items.borrow().len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.borrow_mut().insert(at as usize, value);
            Ok(Value::None)
        }
        "pop" => {
            let len = items.borrow().len() as i64;
            if len == 0 {
                return Err(interp.raise("IndexError", "pop from empty list"));
            }
            let index = args.first().and_then(Value::as_int).unwrap_or(-1);
            let at = if index < 0 { index + len } else { index };
            if at < 0 || at >= len {
                return Err(interp.raise("IndexError", "pop index out of range"));
            }
            Ok(items.borrow_mut().remove(at as usize))
        }
        "remove" => {
            let needle = required(interp, &args, &kwargs, 0, "value", name)?;
            let position = items.borrow().iter().position(|v| py_eq(v, &needle));
            match position {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => Err(interp.raise("ValueError", "list.remove(x): x not in list")),
            }
        }
        "index" => {
            let needle = required(interp, &args, &kwargs, 0, "value", name)?;
            let position = items.borrow().iter().position(|v| py_eq(v, &needle));
            match position {
                Some(i) => Ok(Value::Int(i as i64)),
                None => Err(interp.raise("ValueError", format!("{} is not in list", needle.repr()))),
            }
        }
        "count" => {
            let needle = required(interp, &args, &kwargs, 0, "value", name)?;
            let count = items.borrow().iter().filter(|v| py_eq(v, &needle)).count();
            Ok(Value::Int(count as i64))
        }
        "sort" => {
            let current = items.borrow().clone();
            let key = arg(&[], &kwargs, 0, "key");
            let reverse = arg(&[], &kwargs, 0, "reverse").is_some_and(|v| v.truthy());
            let sorted = sort_values(interp, current, key, reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_method(interp, receiver, name)),
    }
}

fn dict_method(
    interp: &mut Interpreter,
    dict: &Rc<std::cell::RefCell<Dict>>,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Exec<Value> {
    match name {
        "get" => {
            let key = required(interp, &args, &kwargs, 0, "key", name)?;
            let found = dict.borrow().get(&key);
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" => Ok(Value::list(dict.borrow().keys())),
        "values" => Ok(Value::list(dict.borrow().values())),
        "items" => Ok(Value::list(dict.borrow().items())),
        "setdefault" => {
            let key = required(interp, &args, &kwargs, 0, "key", name)?;
            let existing = dict.borrow().get(&key);
            match existing {
                Some(value) => Ok(value),
                None => {
                    let value = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(key, value.clone());
                    Ok(value)
                }
            }
        }
        "update" => {
            let mut pairs = Vec::new();
            if let Some(source) = args.first() {
                match source {
                    Value::Dict(other) => pairs.extend(other.borrow().iter().cloned()),
                    other => {
                        for item in interp.iterate(other)? {
                            if let [k, v] = interp.iterate(&item)?.as_slice() {
                                pairs.push((k.clone(), v.clone()));
                            }
                        }
                    }
                }
            }
            pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(k), v)));
            let mut target = dict.borrow_mut();
            for (k, v) in pairs {
                target.insert(k, v);
            }
            Ok(Value::None)
        }
        "pop" => {
            let key = required(interp, &args, &kwargs, 0, "key", name)?;
            let removed = dict.borrow_mut().remove(&key);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Unwind::Raise(interp.new_exception("KeyError", vec![key]))),
            }
        }
        "popitem" => {
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((k, v)) => Ok(Value::tuple(vec![k, v])),
                None => Err(interp.raise("KeyError", "popitem(): dictionary is empty")),
            }
        }
        "copy" => Ok(Value::dict(dict.borrow().clone())),
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_method(interp, &Value::Dict(dict.clone()), name)),
    }
}

fn set_method(
    interp: &mut Interpreter,
    items: &Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let mut others = Vec::new();
    for value in &args {
        others.push(interp.iterate(value)?);
    }
    let current = items.borrow().clone();
    let contains = |set: &[Value], v: &Value| set.iter().any(|x| py_eq(x, v));
    match name {
        "add" => {
            if let Some(value) = args.first() {
                if !contains(&current, value) {
                    items.borrow_mut().push(value.clone());
                }
            }
            Ok(Value::None)
        }
        "update" => {
            let mut merged = current;
            for value in others.into_iter().flatten() {
                if !contains(&merged, &value) {
                    merged.push(value);
                }
            }
            *items.borrow_mut() = merged;
            Ok(Value::None)
        }
        "remove" | "discard" => {
            let Some(value) = args.first() else {
                return Err(interp.raise("TypeError", format!("{}() takes exactly one argument", name)));
            };
            match current.iter().position(|x| py_eq(x, value)) {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None if name == "discard" => Ok(Value::None),
                None => Err(Unwind::Raise(interp.new_exception("KeyError", vec![value.clone()]))),
            }
        }
        "union" => Ok(Value::set(current.into_iter().chain(others.into_iter().flatten()).collect())),
        "intersection" => Ok(Value::set(
            current
                .into_iter()
                .filter(|v| others.iter().all(|o| contains(o, v)))
                .collect(),
        )),
        "difference" => Ok(Value::set(
            current
                .into_iter()
                .filter(|v| !others.iter().any(|o| contains(o, v)))
                .collect(),
        )),
        "issubset" => Ok(Value::Bool(
            others.first().is_some_and(|o| current.iter().all(|v| contains(o, v))),
        )),
        "pop" => match items.borrow_mut().pop() {
            Some(value) => Ok(value),
            None => Err(interp.raise("KeyError", "pop from an empty set")),
        },
        "copy" => Ok(Value::set(current)),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(no_method(interp, &Value::Set(items.clone()), name)),
    }
}
