/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Runtime values.
//!
//! Values follow the JavaScript model: primitives are copied, arrays and
//! objects are shared references. Values live for a single render and never
//! cross threads, so sharing uses `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::ast::FunctionDef;
use super::builtins::{Builtin, Method};
use super::interpreter::Env;
use crate::error::{RenderError, RenderResult};

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<IndexMap<String, Value>>>;

/// Longest string a render may build.
pub const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

/// Largest array length reachable by index or `length` writes.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Arrays nested deeper than this convert to the empty string.
const MAX_JOIN_DEPTH: usize = 1000;

/// A function literal closed over its defining environment.
pub struct Closure {
    pub def: std::sync::Arc<FunctionDef>,
    pub env: Env,
}

/// A builtin method together with the value it was read from.
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
    Function(Rc<Closure>),
    Builtin(Builtin),
    BoundMethod(Rc<BoundMethod>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => write!(f, "[array; {}]", items.borrow().len()),
            Value::Object(map) => write!(f, "{{object; {}}}", map.borrow().len()),
            Value::Function(closure) => {
                write!(f, "function {}", closure.def.name.as_deref().unwrap_or(""))
            }
            Value::Builtin(builtin) => write!(f, "builtin {}", builtin.name()),
            Value::BoundMethod(bound) => write!(f, "method {}", bound.method.name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Value {
    pub fn new_array(items: Vec<Value>) -> Self {
        let array = Rc::new(RefCell::new(items));
        track(Allocation::Array(Rc::downgrade(&array)));
        Value::Array(array)
    }

    pub fn new_object(map: IndexMap<String, Value>) -> Self {
        let object = Rc::new(RefCell::new(map));
        track(Allocation::Object(Rc::downgrade(&object)));
        Value::Object(object)
    }

    /// Convert a JSON data context.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::new_array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::new_object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod(_) => "function",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(_) | Value::Object(_) => string_to_number(&self.to_js_string()),
            Value::Function(_) | Value::Builtin(_) | Value::BoundMethod(_) => f64::NAN,
        }
    }

    /// The value's string conversion (`String(value)`).
    pub fn to_js_string(&self) -> String {
        self.string_with(&mut Vec::new())
    }

    /// String conversion with the arrays currently being joined in `seen`.
    /// An array that contains itself converts to the empty string inside
    /// its own conversion.
    fn string_with(&self, seen: &mut Vec<*const ()>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => join_nested(items, ",", seen),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(closure) => format!(
                "function {}() {{ [code] }}",
                closure.def.name.as_deref().unwrap_or("")
            ),
            Value::Builtin(builtin) => {
                format!("function {}() {{ [native code] }}", builtin.name())
            }
            Value::BoundMethod(bound) => {
                format!("function {}() {{ [native code] }}", bound.method.name())
            }
        }
    }

    /// Primitive form used by `+` and relational comparison: arrays and
    /// objects become their string conversion.
    pub fn to_primitive(&self) -> Value {
        match self {
            Value::Array(_)
            | Value::Object(_)
            | Value::Function(_)
            | Value::Builtin(_)
            | Value::BoundMethod(_) => Value::from(self.to_js_string()),
            other => other.clone(),
        }
    }

    /// Read `value[key]`.
    pub fn get_property(&self, key: &str) -> RenderResult<Value> {
        match self {
            Value::Undefined | Value::Null => Err(RenderError::type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                self.to_js_string()
            ))),
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map_or(Value::Undefined, |c| Value::from(c.to_string())));
                }
                Ok(self.method(key))
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or_default());
                }
                Ok(self.method(key))
            }
            Value::Object(map) => Ok(map.borrow().get(key).cloned().unwrap_or_default()),
            _ => Ok(self.method(key)),
        }
    }

    fn method(&self, key: &str) -> Value {
        match Method::lookup(self, key) {
            Some(method) => Value::BoundMethod(Rc::new(BoundMethod {
                receiver: self.clone(),
                method,
            })),
            None => Value::Undefined,
        }
    }

    /// Write `value[key] = new_value`. Writes to other primitives are
    /// silently dropped.
    pub fn set_property(&self, key: &str, new_value: Value) -> RenderResult<()> {
        match self {
            Value::Undefined | Value::Null => Err(RenderError::type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                self.to_js_string()
            ))),
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), new_value);
                Ok(())
            }
            Value::Array(items) => {
                if key == "length" {
                    let length = new_value.to_number();
                    let too_long = length > MAX_ARRAY_LENGTH as f64;
                    if length < 0.0 || length.fract() != 0.0 || too_long {
                        return Err(RenderError::range_error("Invalid array length"));
                    }
                    items.borrow_mut().resize(length as usize, Value::Undefined);
                } else if let Some(index) = array_index(key) {
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        if index >= MAX_ARRAY_LENGTH {
                            return Err(RenderError::range_error("Invalid array length"));
                        }
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = new_value;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether `with` on this value makes `name` visible as a bare name.
    pub fn has_own_property(&self, name: &str) -> bool {
        match self {
            Value::Object(map) => map.borrow().contains_key(name),
            Value::Array(items) => {
                name == "length" || array_index(name).is_some_and(|i| i < items.borrow().len())
            }
            _ => false,
        }
    }

    /// Own enumerable keys, as iterated by `for (key in value)`.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.borrow().keys().cloned().collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Property key for `value[key]`.
    pub fn to_property_key(&self) -> String {
        self.to_js_string()
    }
}

/// Canonical array index (`"0"`, `"17"`, but not `"01"` or `"-1"`).
fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// `Array.prototype.join`: `null` and `undefined` elements become empty.
pub fn join(items: &[Value], separator: &str) -> String {
    join_items(items, separator, &mut Vec::new())
}

/// `array.join(separator)`, with `array` itself counted as being joined.
pub fn join_array(array: &Array, separator: &str) -> String {
    join_nested(array, separator, &mut Vec::new())
}

fn join_nested(array: &Array, separator: &str, seen: &mut Vec<*const ()>) -> String {
    let ptr = Rc::as_ptr(array).cast::<()>();
    if seen.contains(&ptr) || seen.len() >= MAX_JOIN_DEPTH {
        return String::new();
    }
    seen.push(ptr);
    let text = join_items(&array.borrow(), separator, seen);
    seen.pop();
    text
}

fn join_items(items: &[Value], separator: &str, seen: &mut Vec<*const ()>) -> String {
    items
        .iter()
        .map(|item| {
            if item.is_nullish() {
                String::new()
            } else {
                item.string_with(seen)
            }
        })
        .collect::<Vec<_>>()
        .join(separator)
}

enum Allocation {
    Array(Weak<RefCell<Vec<Value>>>),
    Object(Weak<RefCell<IndexMap<String, Value>>>),
}

impl Allocation {
    fn is_live(&self) -> bool {
        match self {
            Allocation::Array(weak) => weak.strong_count() > 0,
            Allocation::Object(weak) => weak.strong_count() > 0,
        }
    }
}

struct Heap {
    allocations: Vec<Allocation>,
    prune_at: usize,
}

const INITIAL_PRUNE_AT: usize = 1024;

thread_local! {
    static HEAP: RefCell<Option<Heap>> = const { RefCell::new(None) };
}

fn track(allocation: Allocation) {
    HEAP.with(|heap| {
        if let Some(heap) = heap.borrow_mut().as_mut() {
            if heap.allocations.len() >= heap.prune_at {
                heap.allocations.retain(Allocation::is_live);
                heap.prune_at = (heap.allocations.len() * 2).max(INITIAL_PRUNE_AT);
            }
            heap.allocations.push(allocation);
        }
    });
}

/// Records the arrays and objects created on this thread while it is alive.
/// Dropping the scope empties every one of them that is still reachable, so
/// reference cycles such as `o.self = o` are freed with the render.
pub struct HeapScope {
    previous: Option<Heap>,
}

impl HeapScope {
    pub fn enter() -> Self {
        let heap = Heap {
            allocations: Vec::new(),
            prune_at: INITIAL_PRUNE_AT,
        };
        HeapScope {
            previous: HEAP.with(|current| current.borrow_mut().replace(heap)),
        }
    }
}

impl Drop for HeapScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let heap = HEAP.with(|current| std::mem::replace(&mut *current.borrow_mut(), previous));
        let Some(heap) = heap else {
            return;
        };

        // Hold every survivor before emptying any of them, so releasing the
        // contents never drops a container recursively.
        let mut arrays = Vec::new();
        let mut objects = Vec::new();
        for allocation in heap.allocations {
            match allocation {
                Allocation::Array(weak) => arrays.extend(weak.upgrade()),
                Allocation::Object(weak) => objects.extend(weak.upgrade()),
            }
        }
        let mut contents = Vec::new();
        let mut fields = Vec::new();
        for array in &arrays {
            if let Ok(mut items) = array.try_borrow_mut() {
                contents.push(std::mem::take(&mut *items));
            }
        }
        for object in &objects {
            if let Ok(mut map) = object.try_borrow_mut() {
                fields.push(std::mem::take(&mut *map));
            }
        }
        drop(contents);
        drop(fields);
    }
}

/// String to number conversion (`Number("...")`).
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    // Rust accepts spellings such as "inf" and "NaN" that JavaScript does not.
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Format a number the way JavaScript's `Number.prototype.toString` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let sign = if n < 0.0 { "-" } else { "" };
    // Shortest round-trip digits, e.g. "1.2345e-7".
    let scientific = format!("{:e}", n.abs());
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    // Position of the decimal point relative to the digits.
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else {
        let exp_sign = if point - 1 < 0 { "-" } else { "+" };
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        format!("{first}{fraction}e{exp_sign}{}", (point - 1).abs())
    };
    format!("{sign}{body}")
}

/// `===`
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::BoundMethod(x), Value::BoundMethod(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `SameValueZero`, used by `includes`: like `===` but `NaN` equals itself.
pub fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// `==`
pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(x), Value::String(_)) => *x == b.to_number(),
        (Value::String(_), Value::Number(y)) => a.to_number() == *y,
        (Value::Bool(_), _) => loose_equals(&Value::Number(a.to_number()), b),
        (_, Value::Bool(_)) => loose_equals(a, &Value::Number(b.to_number())),
        (Value::Number(_) | Value::String(_), Value::Array(_) | Value::Object(_)) => {
            loose_equals(a, &b.to_primitive())
        }
        (Value::Array(_) | Value::Object(_), Value::Number(_) | Value::String(_)) => {
            loose_equals(&a.to_primitive(), b)
        }
        _ => strict_equals(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-1.5), "-1.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(0.000001), "0.000001");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::from("").truthy());
        assert!(Value::from("0").truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(Value::new_array(vec![]).truthy());
        assert!(!Value::Null.truthy());
    }

    #[test]
    fn test_loose_equality() {
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &Value::Number(0.0)));
        assert!(loose_equals(&Value::Number(1.0), &Value::from("1")));
        assert!(loose_equals(&Value::Bool(true), &Value::from("1")));
        assert!(loose_equals(
            &Value::new_array(vec![Value::Number(1.0), Value::Number(2.0)]),
            &Value::from("1,2")
        ));
        assert!(!strict_equals(&Value::Number(1.0), &Value::from("1")));
        assert!(!strict_equals(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(same_value_zero(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
    }

    #[test]
    fn test_from_json_and_properties() {
        let value = Value::from_json(&json!({ "name": "Ada", "tags": ["a", null, 3] }));
        assert_eq!(value.get_property("name").unwrap().to_js_string(), "Ada");
        let tags = value.get_property("tags").unwrap();
        assert_eq!(tags.to_js_string(), "a,,3");
        assert_eq!(tags.get_property("length").unwrap().to_number(), 3.0);
        assert!(value.get_property("missing").unwrap().is_nullish());
        assert_eq!(value.keys(), vec!["name".to_string(), "tags".to_string()]);
    }

    #[test]
    fn test_string_indexing_uses_scalar_values() {
        let s = Value::from("héllo");
        assert_eq!(s.get_property("length").unwrap().to_number(), 5.0);
        assert_eq!(s.get_property("1").unwrap().to_js_string(), "é");
    }

    #[test]
    fn test_property_of_undefined_is_type_error() {
        let err = Value::Undefined.get_property("x").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: Cannot read properties of undefined (reading 'x')"
        );
    }

    #[test]
    fn test_array_writes_extend() {
        let array = Value::new_array(vec![]);
        array.set_property("2", Value::Number(1.0)).unwrap();
        assert_eq!(array.to_js_string(), ",,1");
        array.set_property("length", Value::Number(1.0)).unwrap();
        assert_eq!(array.get_property("length").unwrap().to_number(), 1.0);
    }

    #[test]
    fn test_array_growth_is_capped() {
        let array = Value::new_array(vec![]);
        let err = array
            .set_property("4000000000", Value::Number(1.0))
            .unwrap_err();
        assert!(matches!(err, RenderError::Range { .. }));
        let err = array
            .set_property("length", Value::Number(4e9))
            .unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid array length");
        assert_eq!(array.get_property("length").unwrap().to_number(), 0.0);
    }

    #[test]
    fn test_self_containing_array_converts() {
        let array = Value::new_array(vec![Value::Number(1.0)]);
        array.set_property("1", array.clone()).unwrap();
        assert_eq!(array.to_js_string(), "1,");

        let outer = Value::new_array(vec![array.clone(), Value::from("x")]);
        assert_eq!(outer.to_js_string(), "1,,x");
        if let Value::Array(items) = &array {
            assert_eq!(join_array(items, "-"), "1-");
        }
    }

    #[test]
    fn test_deep_nesting_stops_converting() {
        let mut value = Value::from("leaf");
        for _ in 0..MAX_JOIN_DEPTH + 10 {
            value = Value::new_array(vec![value]);
        }
        assert_eq!(value.to_js_string(), "");
    }

    #[test]
    fn test_heap_scope_frees_cycles() {
        let weak = {
            let _heap = HeapScope::enter();
            let object = Value::new_object(IndexMap::new());
            object.set_property("self", object.clone()).unwrap();
            let Value::Object(map) = &object else {
                unreachable!()
            };
            Rc::downgrade(map)
        };
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_heap_scope_restores_outer_scope() {
        let _outer = HeapScope::enter();
        let array = Value::new_array(vec![Value::Number(1.0)]);
        drop(HeapScope::enter());
        assert_eq!(array.to_js_string(), "1");
    }
}
