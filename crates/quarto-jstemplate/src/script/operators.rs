/*
 * operators.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Binary operator implementations.
//!
//! The operand types are a closed set, so operators dispatch with a plain
//! `match` over [`BinaryOp`].

use std::cmp::Ordering;

use super::ast::BinaryOp;
use super::value::{Value, loose_equals, strict_equals};

pub fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        // f64 `%` truncates like JavaScript's remainder.
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => Value::Bool(loose_equals(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::StrictNotEq => Value::Bool(!strict_equals(left, right)),
    }
}

/// `+`: string concatenation if either primitive operand is a string,
/// numeric addition otherwise.
fn add(left: &Value, right: &Value) -> Value {
    let left = left.to_primitive();
    let right = right.to_primitive();
    match (&left, &right) {
        (Value::String(a), Value::String(b)) => {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Value::from(out)
        }
        (Value::String(a), other) => Value::from(format!("{a}{}", other.to_js_string())),
        (other, Value::String(b)) => Value::from(format!("{}{b}", other.to_js_string())),
        _ => Value::Number(left.to_number() + right.to_number()),
    }
}

/// Relational comparison. `None` when either side is `NaN`.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    let left = left.to_primitive();
    let right = right.to_primitive();
    match (&left, &right) {
        // Strings compare by UTF-16 code units.
        (Value::String(a), Value::String(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}
