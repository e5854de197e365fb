//! In-memory evaluation of filter clauses
//!
//! Sub-collection elements live inside their parent document, so their base
//! filters cannot be pushed to storage. This matcher evaluates the common
//! subset of the document query language against a JSON value: implicit
//! equality, dotted paths, `$eq $ne $in $nin $gt $gte $lt $lte $exists`,
//! and the logical `$and $or $nor`. Unknown operators never match.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::warn;

/// Whether `document` satisfies `filter`
pub fn matches(filter: &Value, document: &Value) -> bool {
    match filter {
        Value::Bool(b) => *b,
        Value::Null => true,
        Value::Object(clauses) => matches_object(clauses, document),
        _ => false,
    }
}

fn matches_object(clauses: &Map<String, Value>, document: &Value) -> bool {
    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => each_clause(condition).map_or(false, |mut c| c.all(|f| matches(f, document))),
        "$or" => each_clause(condition).map_or(false, |mut c| c.any(|f| matches(f, document))),
        "$nor" => each_clause(condition).map_or(false, |mut c| !c.any(|f| matches(f, document))),
        op if op.starts_with('$') => {
            warn!(operator = op, "Unsupported top-level filter operator");
            false
        }
        path => matches_field(lookup(document, path), condition),
    })
}

fn each_clause(value: &Value) -> Option<std::slice::Iter<'_, Value>> {
    match value {
        Value::Array(items) => Some(items.iter()),
        _ => None,
    }
}

/// Resolve a dotted path; array elements are addressed by numeric segments
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_field(actual: Option<&Value>, condition: &Value) -> bool {
    if !is_operator_object(condition) {
        return equals(actual, condition);
    }

    let Value::Object(operators) = condition else {
        return false;
    };
    operators.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => equals(actual, operand),
        "$ne" => !equals(actual, operand),
        "$in" => operand
            .as_array()
            .map_or(false, |items| items.iter().any(|item| equals(actual, item))),
        "$nin" => operand
            .as_array()
            .map_or(false, |items| !items.iter().any(|item| equals(actual, item))),
        "$gt" => compare(actual, operand).map_or(false, Ordering::is_gt),
        "$gte" => compare(actual, operand).map_or(false, Ordering::is_ge),
        "$lt" => compare(actual, operand).map_or(false, Ordering::is_lt),
        "$lte" => compare(actual, operand).map_or(false, Ordering::is_le),
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            actual.is_some() == wanted
        }
        other => {
            warn!(operator = other, "Unsupported field filter operator");
            false
        }
    })
}

/// Equality with array membership: a scalar condition matches an array
/// field that contains it. A missing field equals `null`.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(value) if value_eq(value, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| value_eq(item, expected)),
        Some(_) => false,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering within one type family; mixed types are incomparable
fn compare(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (actual?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
