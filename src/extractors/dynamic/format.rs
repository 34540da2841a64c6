//! `format()`, `str.format` and `%` rendering

use super::interpreter::{Exec, Interpreter, Unwind};
use super::value::{format_float, Value};

/// Largest precision a format specifier may request
pub const MAX_PRECISION: usize = 10_000;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Option<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.fill.get_or_insert('0');
        out.align.get_or_insert('=');
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().ok()?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            out.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        out.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
    }
    match &chars[i..] {
        [] => {}
        [kind] => out.kind = Some(*kind),
        _ => return None,
    }
    Some(out)
}

/// Render `value` the way `format(value, spec)` does
pub fn format_spec(interp: &mut Interpreter, value: &Value, spec: &str) -> Exec<String> {
    let Some(parsed) = parse_spec(spec) else {
        return Err(interp.raise("ValueError", format!("Invalid format specifier '{}'", spec)));
    };
    if parsed.precision.is_some_and(|p| p > MAX_PRECISION) {
        return Err(interp.raise("ValueError", "precision too big"));
    }
    interp.check_width(parsed.width)?;
    let numeric = matches!(value, Value::Int(_) | Value::Bool(_) | Value::Float(_));
    let body = match (value, parsed.kind) {
        (Value::Int(_) | Value::Bool(_), None | Some('d' | 'n')) => {
            let n = value.as_int().unwrap_or(0);
            group(&n.unsigned_abs().to_string(), parsed.grouping)
        }
        (Value::Int(_) | Value::Bool(_), Some(kind @ ('x' | 'X' | 'o' | 'b'))) => {
            let n = value.as_int().unwrap_or(0).unsigned_abs();
            let (digits, prefix) = match kind {
                'x' => (format!("{:x}", n), "0x"),
                'X' => (format!("{:X}", n), "0X"),
                'o' => (format!("{:o}", n), "0o"),
                _ => (format!("{:b}", n), "0b"),
            };
            if parsed.alternate {
                format!("{}{}", prefix, digits)
            } else {
                digits
            }
        }
        (Value::Int(_) | Value::Bool(_) | Value::Float(_), Some('c')) if value.as_int().is_some() => {
            let code = value.as_int().unwrap_or(0);
            char::from_u32(code as u32).map(String::from).unwrap_or_default()
        }
        (Value::Int(_) | Value::Bool(_) | Value::Float(_), kind) => {
            let f = value.as_float().unwrap_or(0.0).abs();
            float_body(f, kind, parsed.precision, parsed.grouping)
        }
        (_, None | Some('s')) => {
            let text = interp.to_str(value)?;
            match parsed.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (_, Some(kind)) => {
            return Err(interp.raise(
                "ValueError",
                format!(
                    "Unknown format code '{}' for object of type '{}'",
                    kind,
                    value.type_name()
                ),
            ))
        }
    };

    let negative = match value {
        Value::Float(f) => f.is_sign_negative() && *f != 0.0,
        other => other.as_int().is_some_and(|n| n < 0),
    };
    let sign = if !numeric {
        ""
    } else if negative {
        "-"
    } else {
        match parsed.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    let align = parsed.align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(pad(sign, &body, parsed.width, align, parsed.fill.unwrap_or(' ')))
}

fn float_body(f: f64, kind: Option<char>, precision: Option<usize>, grouping: Option<char>) -> String {
    match kind {
        Some('f' | 'F') => group_float(&format!("{:.*}", precision.unwrap_or(6), f), grouping),
        Some('%') => format!("{:.*}%", precision.unwrap_or(6), f * 100.0),
        Some('e' | 'E') => {
            let rendered = python_exponent(&format!("{:.*e}", precision.unwrap_or(6), f));
            if kind == Some('E') {
                rendered.to_uppercase()
            } else {
                rendered
            }
        }
        Some('g' | 'G') | None if precision.is_some() => {
            let p = precision.unwrap_or(6).max(1);
            let exponent = if f == 0.0 { 0 } else { f.log10().floor() as i32 };
            if exponent < -4 || exponent >= p as i32 {
                python_exponent(&format!("{:.*e}", p - 1, f))
            } else {
                let decimals = (p as i32 - 1 - exponent).max(0) as usize;
                trim_zeros(&format!("{:.*}", decimals, f))
            }
        }
        _ => group_float(&format_float(f), grouping),
    }
}

fn trim_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// `1.5e2` becomes `1.5e+02`
fn python_exponent(rendered: &str) -> String {
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => rendered.to_string(),
    }
}

fn group(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

fn group_float(rendered: &str, separator: Option<char>) -> String {
    match rendered.split_once('.') {
        Some((whole, fraction)) => format!("{}.{}", group(whole, separator), fraction),
        None => group(rendered, separator),
    }
}

fn pad(sign: &str, body: &str, width: usize, align: char, fill: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    if len >= width {
        return format!("{}{}", sign, body);
    }
    let padding = width - len;
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match align {
        '<' => format!("{}{}{}", sign, body, fill_str(padding)),
        '^' => format!(
            "{}{}{}{}",
            fill_str(padding / 2),
            sign,
            body,
            fill_str(padding - padding / 2)
        ),
        '=' => format!("{}{}{}", sign, fill_str(padding), body),
        _ => format!("{}{}{}", fill_str(padding), sign, body),
    }
}

/// `fmt % args`
pub fn percent_format(interp: &mut Interpreter, fmt: &str, args: &Value) -> Exec<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mut next = positional.into_iter();
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == ')' {
                    break;
                }
                name.push(c);
            }
            key = Some(name);
        }
        let mut flags = String::new();
        while let Some(&c) = chars.peek() {
            if matches!(c, '-' | '+' | ' ' | '0' | '#') {
                flags.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let mut width = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                width.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            precision = Some(digits);
        }
        let Some(kind) = chars.next() else {
            return Err(interp.raise("ValueError", "incomplete format"));
        };

        let value = match (&key, args) {
            (Some(name), Value::Dict(dict)) => {
                let found = dict.borrow().get_str(name);
                match found {
                    Some(value) => value,
                    None => return Err(key_error(interp, name)),
                }
            }
            _ => match next.next() {
                Some(value) => value,
                None => {
                    return Err(interp.raise("TypeError", "not enough arguments for format string"))
                }
            },
        };

        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('#') {
            spec.push('#');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        if let Some(p) = &precision {
            spec.push('.');
            spec.push_str(if p.is_empty() { "0" } else { p });
        }

        let rendered = match kind {
            's' | 'r' | 'a' => {
                let text = if kind == 's' {
                    interp.to_str(&value)?
                } else {
                    interp.repr_value(&value)?
                };
                let spec = spec.trim_start_matches(['+', ' ', '#', '0']).to_string();
                format_spec(interp, &Value::str(text), &spec)?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    Value::Int(_) | Value::Bool(_) => value.clone(),
                    other => {
                        return Err(interp.raise(
                            "TypeError",
                            format!("%{} format: a number is required, not {}", kind, other.type_name()),
                        ))
                    }
                };
                format_spec(interp, &n, &format!("{}d", spec))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                format_spec(interp, &value, &format!("{}{}", spec, kind))?
            }
            other => {
                return Err(interp.raise(
                    "ValueError",
                    format!("unsupported format character '{}'", other),
                ))
            }
        };
        out.push_str(&rendered);
    }

    if next.next().is_some() {
        return Err(interp.raise(
            "TypeError",
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn key_error(interp: &Interpreter, name: &str) -> Unwind {
    Unwind::Raise(interp.new_exception("KeyError", vec![Value::str(name)]))
}

/// `fmt.format(*args, **kwargs)`
pub fn str_format(
    interp: &mut Interpreter,
    fmt: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Exec<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut auto_index = 0usize;
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                i += 1;
            }
            out.push('}');
            i += 1;
            continue;
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }

        let mut depth = 1;
        let mut j = i + 1;
        while j < chars.len() {
            match chars[j] {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(interp.raise("ValueError", "Single '{' encountered in format string"));
        }
        let field: String = chars[i + 1..j].iter().collect();
        i = j + 1;

        let (field, spec) = match field.split_once(':') {
            Some((field, spec)) => (field.to_string(), Some(spec.to_string())),
            None => (field, None),
        };
        let (field, conversion) = match field.split_once('!') {
            Some((field, conv)) => (field.to_string(), conv.chars().next()),
            None => (field, None),
        };

        let name_end = field.find(['.', '[']).unwrap_or(field.len());
        let (name, mut rest) = field.split_at(name_end);
        let mut value = if name.is_empty() {
            let value = args.get(auto_index).cloned();
            auto_index += 1;
            value
        } else if let Ok(index) = name.parse::<usize>() {
            args.get(index).cloned()
        } else {
            kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        };
        let Some(mut current) = value.take() else {
            return Err(if name.is_empty() || name.parse::<usize>().is_ok() {
                interp.raise("IndexError", "Replacement index out of range for positional args tuple")
            } else {
                key_error(interp, name)
            });
        };

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                current = interp.get_attr(&current, &after[..end])?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(end) = after.find(']') else {
                    return Err(interp.raise("ValueError", "Missing ']' in format string"));
                };
                let key = &after[..end];
                let index = match key.parse::<i64>() {
                    Ok(n) => Value::Int(n),
                    Err(_) => Value::str(key),
                };
                current = interp.get_item(&current, &index)?;
                rest = &after[end + 1..];
            } else {
                break;
            }
        }

        let current = match conversion {
            Some('r') | Some('a') => Value::str(interp.repr_value(&current)?),
            Some('s') => Value::str(interp.to_str(&current)?),
            _ => current,
        };
        let rendered = match spec {
            Some(spec) if spec.contains('{') => {
                let spec = str_format(interp, &spec, args, kwargs)?;
                format_spec(interp, &current, &spec)?
            }
            Some(spec) if !spec.is_empty() => format_spec(interp, &current, &spec)?,
            _ => interp.to_str(&current)?,
        };
        out.push_str(&rendered);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let spec = parse_spec("*^10,.2f").unwrap();
        assert_eq!(spec.fill, Some('*'));
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.width, 10);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(2));
        assert_eq!(spec.kind, Some('f'));

        let zero = parse_spec("03d").unwrap();
        assert_eq!((zero.fill, zero.align, zero.width), (Some('0'), Some('='), 3));
        assert!(parse_spec("10zz").is_none());
    }

    #[test]
    fn test_number_helpers() {
        assert_eq!(group("1234567", Some(',')), "1,234,567");
        assert_eq!(python_exponent("1.5e2"), "1.5e+02");
        assert_eq!(python_exponent("1.5e-7"), "1.5e-07");
        assert_eq!(float_body(0.5, Some('g'), Some(3), None), "0.5");
        assert_eq!(pad("-", "5", 4, '=', '0'), "-005");
        assert_eq!(pad("", "ab", 5, '^', '*'), "*ab**");
    }
}
