/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Global functions and methods of primitive values.

use std::rc::Rc;

use indexmap::IndexMap;

use super::interpreter::{Env, Interpreter};
use super::value::{
    Array, MAX_STRING_LENGTH, Value, format_number, join, join_array, same_value_zero,
    strict_equals,
};
use crate::error::{RenderError, RenderResult};
use crate::escape::escape_html;

/// Global functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `print(...args)`: append to the output buffer.
    Print,
    /// `_.escape(value)`
    Escape,
    /// `_.each(list, iteratee)`
    Each,
    /// `String(value)`
    String,
    /// `Number(value)`
    Number,
    /// `JSON.stringify(value, replacer, space)`
    Stringify,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Escape => "escape",
            Builtin::Each => "each",
            Builtin::String => "String",
            Builtin::Number => "Number",
            Builtin::Stringify => "stringify",
        }
    }
}

/// Methods of strings, arrays, numbers and booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    ToUpperCase,
    ToLowerCase,
    Trim,
    StartsWith,
    EndsWith,
    Split,
    Repeat,
    CharAt,
    Replace,
    IndexOf,
    Includes,
    Slice,
    ToString,
    Join,
    Push,
    Pop,
    ForEach,
    Map,
    Filter,
    ToFixed,
}

impl Method {
    /// The method called `name` on `receiver`, if it has one.
    pub fn lookup(receiver: &Value, name: &str) -> Option<Method> {
        let method = match (receiver, name) {
            (Value::String(_), "toUpperCase") => Method::ToUpperCase,
            (Value::String(_), "toLowerCase") => Method::ToLowerCase,
            (Value::String(_), "trim") => Method::Trim,
            (Value::String(_), "startsWith") => Method::StartsWith,
            (Value::String(_), "endsWith") => Method::EndsWith,
            (Value::String(_), "split") => Method::Split,
            (Value::String(_), "repeat") => Method::Repeat,
            (Value::String(_), "charAt") => Method::CharAt,
            (Value::String(_), "replace") => Method::Replace,
            (Value::String(_) | Value::Array(_), "indexOf") => Method::IndexOf,
            (Value::String(_) | Value::Array(_), "includes") => Method::Includes,
            (Value::String(_) | Value::Array(_), "slice") => Method::Slice,
            (Value::Array(_), "join") => Method::Join,
            (Value::Array(_), "push") => Method::Push,
            (Value::Array(_), "pop") => Method::Pop,
            (Value::Array(_), "forEach") => Method::ForEach,
            (Value::Array(_), "map") => Method::Map,
            (Value::Array(_), "filter") => Method::Filter,
            (Value::Number(_), "toFixed") => Method::ToFixed,
            (
                Value::String(_) | Value::Array(_) | Value::Number(_) | Value::Bool(_),
                "toString",
            ) => Method::ToString,
            _ => return None,
        };
        Some(method)
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::ToUpperCase => "toUpperCase",
            Method::ToLowerCase => "toLowerCase",
            Method::Trim => "trim",
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
            Method::Split => "split",
            Method::Repeat => "repeat",
            Method::CharAt => "charAt",
            Method::Replace => "replace",
            Method::IndexOf => "indexOf",
            Method::Includes => "includes",
            Method::Slice => "slice",
            Method::ToString => "toString",
            Method::Join => "join",
            Method::Push => "push",
            Method::Pop => "pop",
            Method::ForEach => "forEach",
            Method::Map => "map",
            Method::Filter => "filter",
            Method::ToFixed => "toFixed",
        }
    }
}

/// A fresh global environment for one render.
pub fn global_env() -> Env {
    let env = Env::root();
    env.declare("print", Value::Builtin(Builtin::Print), true);
    env.declare(
        "_",
        Value::new_object(IndexMap::from([
            ("escape".to_string(), Value::Builtin(Builtin::Escape)),
            ("each".to_string(), Value::Builtin(Builtin::Each)),
        ])),
        true,
    );
    env.declare("String", Value::Builtin(Builtin::String), true);
    env.declare("Number", Value::Builtin(Builtin::Number), true);
    env.declare(
        "JSON",
        Value::new_object(IndexMap::from([(
            "stringify".to_string(),
            Value::Builtin(Builtin::Stringify),
        )])),
        true,
    );
    env.declare("undefined", Value::Undefined, false);
    env.declare("NaN", Value::Number(f64::NAN), false);
    env.declare("Infinity", Value::Number(f64::INFINITY), false);
    env
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// `ToIntegerOrInfinity`
fn to_integer(value: &Value) -> f64 {
    let n = value.to_number();
    if n.is_nan() { 0.0 } else { n.trunc() }
}

/// Resolve a possibly negative position against `len`; `undefined` gives
/// `default`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = to_integer(value);
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

/// A non-negative position clamped to `len`.
fn clamped_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    to_integer(value).clamp(0.0, len as f64) as usize
}

fn not_a_function(value: &Value) -> RenderError {
    RenderError::type_error(format!("{} is not a function", value.to_js_string()))
}

pub fn call_builtin(
    interpreter: &mut Interpreter,
    builtin: Builtin,
    args: Vec<Value>,
) -> RenderResult<Value> {
    match builtin {
        Builtin::Print => {
            interpreter.print(&join(&args, ""));
            Ok(Value::Undefined)
        }
        Builtin::Escape => {
            let value = arg(&args, 0);
            if value.is_nullish() {
                Ok(Value::from(""))
            } else {
                Ok(Value::from(escape_html(&value.to_js_string())))
            }
        }
        Builtin::Each => {
            let list = arg(&args, 0);
            let iteratee = arg(&args, 1);
            if !iteratee.is_callable() {
                return Err(not_a_function(&iteratee));
            }
            match &list {
                Value::Array(items) => for_each(interpreter, &list, items, &iteratee)?,
                Value::Object(map) => {
                    let entries: Vec<(String, Value)> = map
                        .borrow()
                        .iter()
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect();
                    for (key, value) in entries {
                        interpreter.call(&iteratee, vec![value, Value::from(key), list.clone()])?;
                    }
                }
                _ => {}
            }
            Ok(list)
        }
        Builtin::String => Ok(match args.first() {
            Some(value) => Value::from(value.to_js_string()),
            None => Value::from(""),
        }),
        Builtin::Number => Ok(Value::Number(args.first().map_or(0.0, Value::to_number))),
        Builtin::Stringify => {
            let indent = match arg(&args, 2) {
                Value::Number(n) => " ".repeat(n.clamp(0.0, 10.0) as usize),
                Value::String(s) => s.chars().take(10).collect(),
                _ => String::new(),
            };
            let mut stringifier = Stringifier {
                indent,
                stack: Vec::new(),
            };
            Ok(stringifier
                .write(&arg(&args, 0), 0)?
                .map_or(Value::Undefined, Value::from))
        }
    }
}

fn for_each(
    interpreter: &mut Interpreter,
    receiver: &Value,
    items: &Array,
    callback: &Value,
) -> RenderResult<()> {
    let len = items.borrow().len();
    for index in 0..len {
        let Some(item) = items.borrow().get(index).cloned() else {
            break;
        };
        interpreter.call(
            callback,
            vec![item, Value::Number(index as f64), receiver.clone()],
        )?;
    }
    Ok(())
}

pub fn call_method(
    interpreter: &mut Interpreter,
    receiver: &Value,
    method: Method,
    args: Vec<Value>,
) -> RenderResult<Value> {
    match receiver {
        Value::String(s) => string_method(interpreter, s, method, &args),
        Value::Array(items) => array_method(interpreter, receiver, items, method, args),
        Value::Number(n) => number_method(*n, method, &args),
        Value::Bool(b) => Ok(Value::from(b.to_string())),
        _ => Err(RenderError::type_error(format!(
            "{} is not a function",
            method.name()
        ))),
    }
}

fn char_index_of(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn string_method(
    interpreter: &mut Interpreter,
    s: &Rc<str>,
    method: Method,
    args: &[Value],
) -> RenderResult<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let search = || arg(args, 0).to_js_string().chars().collect::<Vec<char>>();

    let value = match method {
        Method::ToUpperCase => Value::from(s.to_uppercase()),
        Method::ToLowerCase => Value::from(s.to_lowercase()),
        Method::Trim => Value::from(s.trim()),
        Method::ToString => Value::String(Rc::clone(s)),
        Method::IndexOf => {
            let from = clamped_index(&arg(args, 1), len, 0);
            Value::Number(char_index_of(&chars, &search(), from).map_or(-1.0, |i| i as f64))
        }
        Method::Includes => {
            let from = clamped_index(&arg(args, 1), len, 0);
            Value::Bool(char_index_of(&chars, &search(), from).is_some())
        }
        Method::StartsWith => {
            let from = clamped_index(&arg(args, 1), len, 0);
            Value::Bool(chars[from..].starts_with(&search()))
        }
        Method::EndsWith => {
            let end = clamped_index(&arg(args, 1), len, len);
            Value::Bool(chars[..end].ends_with(&search()))
        }
        Method::Slice => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            let slice: String = if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            };
            Value::from(slice)
        }
        Method::CharAt => {
            let index = to_integer(&arg(args, 0));
            let c = if index >= 0.0 && (index as usize) < len {
                chars[index as usize].to_string()
            } else {
                String::new()
            };
            Value::from(c)
        }
        Method::Repeat => {
            let count = to_integer(&arg(args, 0));
            if count < 0.0 || count.is_infinite() {
                return Err(RenderError::range_error(format!(
                    "Invalid count value: {}",
                    format_number(count)
                )));
            }
            if s.is_empty() {
                return Ok(Value::from(""));
            }
            if count * s.len() as f64 > MAX_STRING_LENGTH as f64 {
                return Err(RenderError::range_error("Invalid string length"));
            }
            Value::from(s.repeat(count as usize))
        }
        Method::Split => {
            let limit = match arg(args, 1) {
                Value::Undefined => usize::MAX,
                other => other.to_number().max(0.0) as usize,
            };
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::String(Rc::clone(s))],
                separator => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        chars.iter().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::new_array(parts.into_iter().take(limit).collect())
        }
        Method::Replace => {
            let pattern = arg(args, 0).to_js_string();
            let Some(position) = s.find(pattern.as_str()) else {
                return Ok(Value::String(Rc::clone(s)));
            };
            let replacement = match arg(args, 1) {
                callback if callback.is_callable() => {
                    let index = s[..position].chars().count();
                    interpreter
                        .call(
                            &callback,
                            vec![
                                Value::from(pattern.as_str()),
                                Value::Number(index as f64),
                                Value::String(Rc::clone(s)),
                            ],
                        )?
                        .to_js_string()
                }
                other => other
                    .to_js_string()
                    .replace("$&", &pattern)
                    .replace("$$", "$"),
            };
            let mut out = String::with_capacity(s.len() + replacement.len());
            out.push_str(&s[..position]);
            out.push_str(&replacement);
            out.push_str(&s[position + pattern.len()..]);
            Value::from(out)
        }
        _ => return Err(RenderError::type_error(format!(
            "{} is not a function",
            method.name()
        ))),
    };
    Ok(value)
}

fn array_method(
    interpreter: &mut Interpreter,
    receiver: &Value,
    items: &Array,
    method: Method,
    args: Vec<Value>,
) -> RenderResult<Value> {
    let len = items.borrow().len();
    let value = match method {
        Method::Join => {
            let separator = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            Value::from(join_array(items, &separator))
        }
        Method::ToString => Value::from(join_array(items, ",")),
        Method::Push => {
            let mut items = items.borrow_mut();
            items.extend(args);
            Value::Number(items.len() as f64)
        }
        Method::Pop => items.borrow_mut().pop().unwrap_or_default(),
        Method::IndexOf => {
            let search = arg(&args, 0);
            let from = relative_index(&arg(&args, 1), len, 0);
            let index = items
                .borrow()
                .iter()
                .enumerate()
                .skip(from)
                .find(|(_, item)| strict_equals(item, &search))
                .map_or(-1.0, |(i, _)| i as f64);
            Value::Number(index)
        }
        Method::Includes => {
            let search = arg(&args, 0);
            Value::Bool(items.borrow().iter().any(|item| same_value_zero(item, &search)))
        }
        Method::Slice => {
            let start = relative_index(&arg(&args, 0), len, 0);
            let end = relative_index(&arg(&args, 1), len, len);
            let slice = if start < end {
                items.borrow()[start..end].to_vec()
            } else {
                Vec::new()
            };
            Value::new_array(slice)
        }
        Method::ForEach => {
            let callback = arg(&args, 0);
            if !callback.is_callable() {
                return Err(not_a_function(&callback));
            }
            for_each(interpreter, receiver, items, &callback)?;
            Value::Undefined
        }
        Method::Map | Method::Filter => {
            let callback = arg(&args, 0);
            if !callback.is_callable() {
                return Err(not_a_function(&callback));
            }
            let mut out = Vec::with_capacity(len);
            for index in 0..len {
                let Some(item) = items.borrow().get(index).cloned() else {
                    break;
                };
                let result = interpreter.call(
                    &callback,
                    vec![item.clone(), Value::Number(index as f64), receiver.clone()],
                )?;
                if method == Method::Map {
                    out.push(result);
                } else if result.truthy() {
                    out.push(item);
                }
            }
            Value::new_array(out)
        }
        _ => {
            return Err(RenderError::type_error(format!(
                "{} is not a function",
                method.name()
            )));
        }
    };
    Ok(value)
}

fn number_method(n: f64, method: Method, args: &[Value]) -> RenderResult<Value> {
    match method {
        Method::ToFixed => {
            let digits = to_integer(&arg(args, 0));
            if !(0.0..=100.0).contains(&digits) {
                return Err(RenderError::range_error(
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            if !n.is_finite() || n.abs() >= 1e21 {
                return Ok(Value::from(format_number(n)));
            }
            Ok(Value::from(to_fixed(n, digits as usize)))
        }
        Method::ToString => match arg(args, 0) {
            Value::Undefined => Ok(Value::from(format_number(n))),
            radix => {
                let radix = to_integer(&radix);
                if !(2.0..=36.0).contains(&radix) {
                    return Err(RenderError::range_error(
                        "toString() radix must be between 2 and 36",
                    ));
                }
                Ok(Value::from(to_radix(n, radix as u32)))
            }
        },
        _ => Err(RenderError::type_error(format!(
            "{} is not a function",
            method.name()
        ))),
    }
}

/// `Number.prototype.toFixed` for finite values below 1e21: round the exact
/// decimal expansion half away from zero.
fn to_fixed(n: f64, digits: usize) -> String {
    // 1100 places is enough for the exact expansion of any f64.
    let exact = format!("{:.1100}", n.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut out_digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().chain(std::iter::repeat(b'0')).take(digits))
        .map(|b| b - b'0')
        .collect();

    if frac_part.as_bytes().get(digits).is_some_and(|b| *b >= b'5') {
        let mut i = out_digits.len();
        loop {
            if i == 0 {
                out_digits.insert(0, 1);
                break;
            }
            i -= 1;
            if out_digits[i] == 9 {
                out_digits[i] = 0;
            } else {
                out_digits[i] += 1;
                break;
            }
        }
    }

    let int_len = out_digits.len() - digits;
    let mut out = String::with_capacity(out_digits.len() + 2);
    if n < 0.0 {
        out.push('-');
    }
    out.extend(out_digits[..int_len].iter().map(|d| char::from(b'0' + d)));
    if digits > 0 {
        out.push('.');
        out.extend(out_digits[int_len..].iter().map(|d| char::from(b'0' + d)));
    }
    out
}

/// Integer part in another radix; fractional values fall back to base 10.
fn to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 || n.abs() > u64::MAX as f64 {
        return format_number(n);
    }
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % u64::from(radix)) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        value /= u64::from(radix);
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// `JSON.stringify` with cycle detection.
struct Stringifier {
    indent: String,
    stack: Vec<*const ()>,
}

impl Stringifier {
    /// `None` for values JSON cannot represent (`undefined`, functions).
    fn write(&mut self, value: &Value, depth: usize) -> RenderResult<Option<String>> {
        let text = match value {
            Value::Undefined | Value::Function(_) | Value::Builtin(_) | Value::BoundMethod(_) => {
                return Ok(None);
            }
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.is_finite() => format_number(*n),
            Value::Number(_) => "null".to_string(),
            Value::String(s) => quote(s),
            Value::Array(items) => {
                self.enter(Rc::as_ptr(items).cast())?;
                let items = items.borrow().clone();
                let mut parts = Vec::with_capacity(items.len());
                for item in &items {
                    parts.push(
                        self.write(item, depth + 1)?
                            .unwrap_or_else(|| "null".to_string()),
                    );
                }
                self.stack.pop();
                self.wrap('[', ']', parts, depth)
            }
            Value::Object(map) => {
                self.enter(Rc::as_ptr(map).cast())?;
                let entries: Vec<(String, Value)> = map
                    .borrow()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                let colon = if self.indent.is_empty() { ":" } else { ": " };
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in &entries {
                    if let Some(text) = self.write(value, depth + 1)? {
                        parts.push(format!("{}{colon}{text}", quote(key)));
                    }
                }
                self.stack.pop();
                self.wrap('{', '}', parts, depth)
            }
        };
        Ok(Some(text))
    }

    fn enter(&mut self, ptr: *const ()) -> RenderResult<()> {
        if self.stack.contains(&ptr) {
            return Err(RenderError::type_error(
                "Converting circular structure to JSON",
            ));
        }
        self.stack.push(ptr);
        Ok(())
    }

    fn wrap(&self, open: char, close: char, parts: Vec<String>, depth: usize) -> String {
        if parts.is_empty() {
            return format!("{open}{close}");
        }
        if self.indent.is_empty() {
            return format!("{open}{}{close}", parts.join(","));
        }
        let inner = self.indent.repeat(depth + 1);
        let outer = self.indent.repeat(depth);
        format!(
            "{open}\n{inner}{}\n{outer}{close}",
            parts.join(&format!(",\n{inner}"))
        )
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}
