//! The built-in universe and value methods.
//!
//! `universe()` returns the bindings visible to every module. Hosts may
//! extend the map before constructing an [`Evaluator`](super::Evaluator)
//! (the validator registration built-in is injected that way).

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::info;

use crate::eval::{EvalError, EvalErrorKind, Evaluator};
use crate::value::{Builtin, CallArgs, Key, StructValue, Value};

/// Construct the default built-in bindings.
pub fn universe() -> IndexMap<String, Value> {
    let mut u = IndexMap::new();
    let mut add = |name: &str,
                   f: fn(&mut Evaluator<'_>, CallArgs) -> Result<Value, EvalError>| {
        u.insert(name.to_string(), Builtin::value(name, f));
    };

    add("len", builtin_len);
    add("str", builtin_str);
    add("int", builtin_int);
    add("float", builtin_float);
    add("bool", builtin_bool);
    add("type", builtin_type);
    add("range", builtin_range);
    add("list", builtin_list);
    add("dict", builtin_dict);
    add("tuple", builtin_tuple);
    add("set", builtin_set);
    add("enumerate", builtin_enumerate);
    add("zip", builtin_zip);
    add("sorted", builtin_sorted);
    add("reversed", builtin_reversed);
    add("min", builtin_min);
    add("max", builtin_max);
    add("any", builtin_any);
    add("all", builtin_all);
    add("hasattr", builtin_hasattr);
    add("getattr", builtin_getattr);
    add("print", builtin_print);
    add("fail", builtin_fail);
    add("struct", builtin_struct);
    u
}

fn builtin_len(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("len", 1)?;
    Ok(Value::Int(args.positional[0].length()? as i64))
}

fn builtin_str(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("str", 0, 1)?;
    match args.positional.first() {
        Some(v) => Ok(Value::str(v.to_display_string())),
        None => Ok(Value::str("")),
    }
}

fn builtin_int(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("int", 1)?;
    match &args.positional[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(x) => Ok(Value::Int(*x as i64)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| EvalError::value_error(format!("invalid int literal: {s:?}"))),
        other => Err(EvalError::type_error(format!(
            "int() cannot convert {}",
            other.type_name()
        ))),
    }
}

fn builtin_float(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("float", 1)?;
    match &args.positional[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(x) => Ok(Value::Float(*x)),
        Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| EvalError::value_error(format!("invalid float literal: {s:?}"))),
        other => Err(EvalError::type_error(format!(
            "float() cannot convert {}",
            other.type_name()
        ))),
    }
}

fn builtin_bool(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("bool", 1)?;
    Ok(Value::Bool(args.positional[0].truthy()))
}

fn builtin_type(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("type", 1)?;
    Ok(Value::str(args.positional[0].type_name()))
}

fn builtin_range(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("range", 1, 3)?;
    let as_int = |v: &Value| match v {
        Value::Int(n) => Ok(*n),
        other => Err(EvalError::type_error(format!(
            "range() expects integers, got {}",
            other.type_name()
        ))),
    };
    let (start, stop, step) = match args.positional.len() {
        1 => (0, as_int(&args.positional[0])?, 1),
        2 => (as_int(&args.positional[0])?, as_int(&args.positional[1])?, 1),
        _ => (
            as_int(&args.positional[0])?,
            as_int(&args.positional[1])?,
            as_int(&args.positional[2])?,
        ),
    };
    if step == 0 {
        return Err(EvalError::value_error("range() step must not be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(out))
}

fn builtin_list(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("list", 0, 1)?;
    match args.positional.first() {
        Some(v) => Ok(Value::list(v.iterate()?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn builtin_dict(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    if args.positional.len() > 1 {
        return Err(EvalError::arity_error(format!(
            "dict() takes at most 1 positional argument, got {}",
            args.positional.len()
        )));
    }
    let mut map = IndexMap::new();
    if let Some(v) = args.positional.first() {
        for pair in v.iterate()? {
            let items = pair.iterate().map_err(|_| {
                EvalError::type_error("dict() expects an iterable of (key, value) pairs")
            })?;
            if items.len() != 2 {
                return Err(EvalError::value_error(
                    "dict() expects an iterable of (key, value) pairs",
                ));
            }
            map.insert(Key::from_value(&items[0])?, items[1].clone());
        }
    }
    for (name, value) in &args.keywords {
        map.insert(Key::Str(name.as_str().into()), value.clone());
    }
    Ok(Value::dict(map))
}

fn builtin_tuple(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("tuple", 0, 1)?;
    match args.positional.first() {
        Some(v) => Ok(Value::tuple(v.iterate()?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn builtin_set(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("set", 0, 1)?;
    let mut set = IndexSet::new();
    if let Some(v) = args.positional.first() {
        for item in v.iterate()? {
            set.insert(Key::from_value(&item)?);
        }
    }
    Ok(Value::Set(Rc::new(std::cell::RefCell::new(set))))
}

fn builtin_enumerate(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("enumerate", 1, 2)?;
    let start = match args.positional.get(1) {
        Some(Value::Int(n)) => *n,
        Some(other) => {
            return Err(EvalError::type_error(format!(
                "enumerate() start must be an int, got {}",
                other.type_name()
            )));
        }
        None => 0,
    };
    let out = args.positional[0]
        .iterate()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
        .collect();
    Ok(Value::list(out))
}

fn builtin_zip(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.no_keywords("zip")?;
    let mut columns = Vec::with_capacity(args.positional.len());
    for v in &args.positional {
        columns.push(v.iterate()?);
    }
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(Value::tuple(
            columns.iter().map(|c| c[i].clone()).collect(),
        ));
    }
    Ok(Value::list(out))
}

fn builtin_sorted(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("sorted", 1)?;
    let mut items = args.positional[0].iterate()?;
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            std::cmp::Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(Value::list(items)),
    }
}

fn builtin_reversed(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("reversed", 1)?;
    let mut items = args.positional[0].iterate()?;
    items.reverse();
    Ok(Value::list(items))
}

fn extremum(name: &str, args: &CallArgs, want_max: bool) -> Result<Value, EvalError> {
    args.no_keywords(name)?;
    let items = if args.positional.len() == 1 {
        args.positional[0].iterate()?
    } else {
        args.positional.clone()
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                let replace = match item.compare(&current)? {
                    std::cmp::Ordering::Greater => want_max,
                    std::cmp::Ordering::Less => !want_max,
                    std::cmp::Ordering::Equal => false,
                };
                if replace {
                    item
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| EvalError::value_error(format!("{name}() of an empty sequence")))
}

fn builtin_min(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    extremum("min", &args, false)
}

fn builtin_max(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    extremum("max", &args, true)
}

fn builtin_any(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("any", 1)?;
    Ok(Value::Bool(
        args.positional[0].iterate()?.iter().any(Value::truthy),
    ))
}

fn builtin_all(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("all", 1)?;
    Ok(Value::Bool(
        args.positional[0].iterate()?.iter().all(Value::truthy),
    ))
}

fn builtin_hasattr(eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("hasattr", 2)?;
    let Value::Str(name) = &args.positional[1] else {
        return Err(EvalError::type_error("hasattr() attribute must be a string"));
    };
    Ok(Value::Bool(
        eval.attr_get(&args.positional[0], name).is_ok(),
    ))
}

fn builtin_getattr(eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.between("getattr", 2, 3)?;
    let Value::Str(name) = &args.positional[1] else {
        return Err(EvalError::type_error("getattr() attribute must be a string"));
    };
    match eval.attr_get(&args.positional[0], name) {
        Ok(v) => Ok(v),
        Err(_) if args.positional.len() == 3 => Ok(args.positional[2].clone()),
        Err(e) => Err(e),
    }
}

/// `print(...)` is surfaced through the host's structured logging with the
/// call position attached.
fn builtin_print(eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.no_keywords("print")?;
    let message = args
        .positional
        .iter()
        .map(Value::to_display_string)
        .collect::<Vec<_>>()
        .join(" ");
    match eval.current_position() {
        Some(pos) => info!(target: "forma_script", "[{pos}] {message}"),
        None => info!(target: "forma_script", "{message}"),
    }
    Ok(Value::None)
}

/// Abort evaluation with a backtrace-annotated error.
fn builtin_fail(eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    args.exactly("fail", 1)?;
    let message = args.positional[0].to_display_string();
    Err(EvalError::new(EvalErrorKind::Fail, message)
        .or_position(eval.current_position()))
}

/// Construct an immutable record from keyword arguments.
fn builtin_struct(_eval: &mut Evaluator<'_>, args: CallArgs) -> Result<Value, EvalError> {
    if !args.positional.is_empty() {
        return Err(EvalError::arity_error(
            "struct() takes keyword arguments only",
        ));
    }
    let mut fields = IndexMap::new();
    for (name, value) in args.keywords {
        fields.insert(name, value);
    }
    Ok(Value::Struct(Rc::new(StructValue { fields })))
}

// === Methods ===

/// Resolve a method on a built-in value type. Returns a bound callable or
/// `None` when the type has no such method.
pub fn method_for(receiver: &Value, name: &str) -> Option<Value> {
    match receiver {
        Value::Str(_) => string_method(receiver.clone(), name),
        Value::List(_) => list_method(receiver.clone(), name),
        Value::Dict(_) => dict_method(receiver.clone(), name),
        _ => None,
    }
}

fn string_method(receiver: Value, name: &str) -> Option<Value> {
    let Value::Str(s) = receiver else {
        return None;
    };
    let method = match name {
        "format" => {
            let s = s.clone();
            Builtin::value("format", move |_eval, args| {
                args.no_keywords("format")?;
                format_string(&s, &args.positional)
            })
        }
        "upper" => {
            let s = s.clone();
            Builtin::value("upper", move |_eval, args| {
                args.exactly("upper", 0)?;
                Ok(Value::str(s.to_uppercase()))
            })
        }
        "lower" => {
            let s = s.clone();
            Builtin::value("lower", move |_eval, args| {
                args.exactly("lower", 0)?;
                Ok(Value::str(s.to_lowercase()))
            })
        }
        "strip" => {
            let s = s.clone();
            Builtin::value("strip", move |_eval, args| {
                args.exactly("strip", 0)?;
                Ok(Value::str(s.trim()))
            })
        }
        "split" => {
            let s = s.clone();
            Builtin::value("split", move |_eval, args| {
                args.between("split", 0, 1)?;
                let parts: Vec<Value> = match args.positional.first() {
                    Some(Value::Str(sep)) if !sep.is_empty() => {
                        s.split(sep.as_ref()).map(Value::str).collect()
                    }
                    Some(_) => {
                        return Err(EvalError::value_error(
                            "split() separator must be a non-empty string",
                        ));
                    }
                    None => s.split_whitespace().map(Value::str).collect(),
                };
                Ok(Value::list(parts))
            })
        }
        "join" => {
            let s = s.clone();
            Builtin::value("join", move |_eval, args| {
                args.exactly("join", 1)?;
                let mut parts = Vec::new();
                for item in args.positional[0].iterate()? {
                    match item {
                        Value::Str(part) => parts.push(part.to_string()),
                        other => {
                            return Err(EvalError::type_error(format!(
                                "join() expects strings, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Ok(Value::str(parts.join(s.as_ref())))
            })
        }
        "replace" => {
            let s = s.clone();
            Builtin::value("replace", move |_eval, args| {
                args.exactly("replace", 2)?;
                match (&args.positional[0], &args.positional[1]) {
                    (Value::Str(from), Value::Str(to)) => {
                        Ok(Value::str(s.replace(from.as_ref(), to)))
                    }
                    _ => Err(EvalError::type_error("replace() expects two strings")),
                }
            })
        }
        "startswith" => {
            let s = s.clone();
            Builtin::value("startswith", move |_eval, args| {
                args.exactly("startswith", 1)?;
                match &args.positional[0] {
                    Value::Str(prefix) => Ok(Value::Bool(s.starts_with(prefix.as_ref()))),
                    _ => Err(EvalError::type_error("startswith() expects a string")),
                }
            })
        }
        "endswith" => {
            let s = s.clone();
            Builtin::value("endswith", move |_eval, args| {
                args.exactly("endswith", 1)?;
                match &args.positional[0] {
                    Value::Str(suffix) => Ok(Value::Bool(s.ends_with(suffix.as_ref()))),
                    _ => Err(EvalError::type_error("endswith() expects a string")),
                }
            })
        }
        _ => return None,
    };
    Some(method)
}

fn list_method(receiver: Value, name: &str) -> Option<Value> {
    let Value::List(list) = receiver else {
        return None;
    };
    let method = match name {
        "append" => {
            let list = list.clone();
            Builtin::value("append", move |_eval, args| {
                args.exactly("append", 1)?;
                list.borrow_mut().push(args.positional[0].clone());
                Ok(Value::None)
            })
        }
        "extend" => {
            let list = list.clone();
            Builtin::value("extend", move |_eval, args| {
                args.exactly("extend", 1)?;
                let items = args.positional[0].iterate()?;
                list.borrow_mut().extend(items);
                Ok(Value::None)
            })
        }
        _ => return None,
    };
    Some(method)
}

fn dict_method(receiver: Value, name: &str) -> Option<Value> {
    let Value::Dict(dict) = receiver else {
        return None;
    };
    let method = match name {
        "get" => {
            let dict = dict.clone();
            Builtin::value("get", move |_eval, args| {
                args.between("get", 1, 2)?;
                let key = Key::from_value(&args.positional[0])?;
                match dict.borrow().get(&key) {
                    Some(v) => Ok(v.clone()),
                    None => Ok(args.positional.get(1).cloned().unwrap_or(Value::None)),
                }
            })
        }
        "keys" => {
            let dict = dict.clone();
            Builtin::value("keys", move |_eval, args| {
                args.exactly("keys", 0)?;
                Ok(Value::list(
                    dict.borrow().keys().map(Key::to_value).collect(),
                ))
            })
        }
        "values" => {
            let dict = dict.clone();
            Builtin::value("values", move |_eval, args| {
                args.exactly("values", 0)?;
                Ok(Value::list(dict.borrow().values().cloned().collect()))
            })
        }
        "items" => {
            let dict = dict.clone();
            Builtin::value("items", move |_eval, args| {
                args.exactly("items", 0)?;
                Ok(Value::list(
                    dict.borrow()
                        .iter()
                        .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                        .collect(),
                ))
            })
        }
        "update" => {
            let dict = dict.clone();
            Builtin::value("update", move |_eval, args| {
                args.exactly("update", 1)?;
                match &args.positional[0] {
                    Value::Dict(other) => {
                        let other = other.borrow().clone();
                        dict.borrow_mut().extend(other);
                        Ok(Value::None)
                    }
                    other => Err(EvalError::type_error(format!(
                        "update() expects a dict, got {}",
                        other.type_name()
                    ))),
                }
            })
        }
        _ => return None,
    };
    Some(method)
}

/// Minimal `str.format`: `{}` consumes the next positional argument,
/// `{N}` indexes explicitly, `{{`/`}}` escape braces.
fn format_string(fmt: &str, args: &[Value]) -> Result<Value, EvalError> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_positional = 0usize;
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => spec.push(c),
                        None => {
                            return Err(EvalError::value_error(
                                "unmatched `{` in format string",
                            ));
                        }
                    }
                }
                let index = if spec.is_empty() {
                    let i = next_positional;
                    next_positional += 1;
                    i
                } else {
                    spec.parse::<usize>().map_err(|_| {
                        EvalError::value_error(format!("invalid format field `{{{spec}}}`"))
                    })?
                };
                let value = args.get(index).ok_or_else(|| {
                    EvalError::index_error(format!(
                        "format() field {index} out of range for {} argument(s)",
                        args.len()
                    ))
                })?;
                out.push_str(&value.to_display_string());
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(EvalError::value_error("unmatched `}` in format string"));
                }
            }
            _ => out.push(ch),
        }
    }
    Ok(Value::str(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_string() {
        let out = format_string(
            "{}-{} and {0} {{literal}}",
            &[Value::Int(1), Value::str("x")],
        )
        .unwrap();
        assert!(out.equals(&Value::str("1-x and 1 {literal}")));
    }

    #[test]
    fn test_format_string_out_of_range() {
        assert!(format_string("{3}", &[Value::Int(1)]).is_err());
    }
}
