//! Secondary (non-geo) predicates applied to candidate documents.
//!
//! Supports field equality and the comparison operators `$eq`, `$ne`, `$gt`,
//! `$gte`, `$lt`, `$lte`, `$in`, `$nin` and `$exists` on dotted paths. A field
//! holding an array matches when the array itself or any of its elements does.

use crate::error::{GeoError, Result};
use crate::types::fields_dotted;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    path: String,
    ops: Vec<Op>,
}

/// A conjunction of per-field predicates.
///
/// # Examples
///
/// ```rust
/// use geo2d::Filter;
/// use serde_json::json;
///
/// let filter = Filter::parse(&json!({"kind": "cafe", "rating": {"$gte": 4}})).unwrap();
/// assert!(filter.matches(&json!({"kind": "cafe", "rating": 4.5})));
/// assert!(!filter.matches(&json!({"kind": "bar", "rating": 5})));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn parse(query: &Value) -> Result<Self> {
        let Some(map) = query.as_object() else {
            return Err(GeoError::BadQuery(format!("filter must be an object: {}", query)));
        };
        Self::from_map(map, None)
    }

    /// The filter for `query` with the geo field removed, or `None` when
    /// nothing else is constrained.
    pub fn without_field(query: &Value, geo_field: &str) -> Result<Option<Self>> {
        let Some(map) = query.as_object() else {
            return Ok(None);
        };
        let filter = Self::from_map(map, Some(geo_field))?;
        Ok((!filter.clauses.is_empty()).then_some(filter))
    }

    fn from_map(map: &Map<String, Value>, skip: Option<&str>) -> Result<Self> {
        let mut clauses = Vec::new();
        for (path, cond) in map {
            if Some(path.as_str()) == skip {
                continue;
            }
            clauses.push(Clause {
                path: path.clone(),
                ops: parse_condition(cond)?,
            });
        }
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| {
            let values = candidates(doc, &clause.path);
            clause.ops.iter().all(|op| op_matches(op, &values))
        })
    }
}

fn parse_condition(cond: &Value) -> Result<Vec<Op>> {
    let Some(map) = cond.as_object() else {
        return Ok(vec![Op::Eq(cond.clone())]);
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(vec![Op::Eq(cond.clone())]);
    }

    map.iter()
        .map(|(name, arg)| {
            Ok(match name.as_str() {
                "$eq" => Op::Eq(arg.clone()),
                "$ne" => Op::Ne(arg.clone()),
                "$gt" => Op::Gt(arg.clone()),
                "$gte" => Op::Gte(arg.clone()),
                "$lt" => Op::Lt(arg.clone()),
                "$lte" => Op::Lte(arg.clone()),
                "$in" => Op::In(list_arg(name, arg)?),
                "$nin" => Op::Nin(list_arg(name, arg)?),
                "$exists" => Op::Exists(truthy(arg)),
                other => {
                    return Err(GeoError::BadQuery(format!(
                        "unsupported filter operator: {}",
                        other
                    )))
                }
            })
        })
        .collect()
}

fn list_arg(name: &str, arg: &Value) -> Result<Vec<Value>> {
    match arg {
        Value::Array(items) => Ok(items.clone()),
        other => Err(GeoError::BadQuery(format!("{} needs an array, got: {}", name, other))),
    }
}

/// Truthiness of a query argument: `false`, `null`, `0` and missing are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn candidates<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for value in fields_dotted(doc, path, false) {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn op_matches(op: &Op, values: &[&Value]) -> bool {
    match op {
        Op::Eq(want) => matches_eq(want, values),
        Op::Ne(want) => !matches_eq(want, values),
        Op::Gt(want) => values.iter().any(|v| compare(v, want) == Some(Ordering::Greater)),
        Op::Gte(want) => values
            .iter()
            .any(|v| matches!(compare(v, want), Some(Ordering::Greater | Ordering::Equal))),
        Op::Lt(want) => values.iter().any(|v| compare(v, want) == Some(Ordering::Less)),
        Op::Lte(want) => values
            .iter()
            .any(|v| matches!(compare(v, want), Some(Ordering::Less | Ordering::Equal))),
        Op::In(list) => list.iter().any(|want| matches_eq(want, values)),
        Op::Nin(list) => !list.iter().any(|want| matches_eq(want, values)),
        Op::Exists(should) => values.is_empty() != *should,
    }
}

fn matches_eq(want: &Value, values: &[&Value]) -> bool {
    if want.is_null() && values.is_empty() {
        return true;
    }
    values.iter().any(|v| values_equal(v, want))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
