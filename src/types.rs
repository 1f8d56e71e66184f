//! Shared value types and document helpers.
//!
//! Documents are plain `serde_json::Value` objects. The helpers here walk
//! dotted field paths the way the index expects: intermediate arrays are
//! traversed, a trailing array is returned whole.

use crate::shapes::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored document.
pub type Document = Value;

/// Location of a document in a collection. Never reused once freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scan direction over the ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// How useful a 2d index is for answering a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suitability {
    Useless,
    Helpful,
    Optimal,
}

/// One result produced by a geo cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoMatch {
    pub record: RecordId,
    pub document: Document,
    /// Distance from the query point, for `$near` searches.
    pub distance: Option<f64>,
    /// Whether `distance` was computed from the document rather than its key.
    pub exact: bool,
    /// The matched location, when it was resolved exactly.
    pub location: Option<Point>,
}

/// Read a point from `[x, y, ...]` or `{a: x, b: y, ...}`.
///
/// Only the first two entries are used. The error string describes the
/// problem; callers wrap it in the error kind that fits their context.
pub(crate) fn point_from_value(value: &Value) -> Result<Point, String> {
    let mut iter: Box<dyn Iterator<Item = &Value>> = match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(map) => Box::new(map.values()),
        other => return Err(format!("location must be an array or object, got: {}", other)),
    };

    let Some(x) = iter.next() else {
        return Err("geo field is empty".to_string());
    };
    let Some(y) = iter.next() else {
        return Err(format!("geo field only has 1 element: {}", value));
    };

    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => Ok(Point::new(x, y)),
        _ => Err(format!(
            "geo values must be 'legacy coordinate pairs' for 2d indexes: {}",
            value
        )),
    }
}

/// Whether the value is an array or object, i.e. can hold a location.
pub(crate) fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// First entry of an array or object.
pub(crate) fn first_entry(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(map) => map.values().next(),
        _ => None,
    }
}

pub(crate) fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Entries of an array or object, in order.
pub(crate) fn container_entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    }
}

/// Single value at a dotted path. Numeric components index into arrays.
pub(crate) fn get_dotted<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for part in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// All values reachable at a dotted path, descending through intermediate arrays.
///
/// With `expand_last` a trailing array contributes its elements instead of itself.
pub(crate) fn fields_dotted<'a>(doc: &'a Value, path: &str, expand_last: bool) -> Vec<&'a Value> {
    let mut out = Vec::new();
    collect_dotted(doc, path, expand_last, &mut out);
    out
}

fn collect_dotted<'a>(doc: &'a Value, path: &str, expand_last: bool, out: &mut Vec<&'a Value>) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let Some(value) = doc.as_object().and_then(|map| map.get(head)) else {
        return;
    };

    match rest {
        None => match value {
            Value::Array(items) if expand_last => out.extend(items.iter()),
            _ => out.push(value),
        },
        Some(rest) => match value {
            Value::Array(items) => {
                if let Some(item) = rest
                    .split('.')
                    .next()
                    .and_then(|idx| idx.parse::<usize>().ok())
                    .and_then(|idx| items.get(idx))
                {
                    match rest.split_once('.') {
                        Some((_, tail)) => collect_dotted(item, tail, expand_last, out),
                        None => out.push(item),
                    }
                    return;
                }
                for item in items {
                    collect_dotted(item, rest, expand_last, out);
                }
            }
            Value::Object(_) => collect_dotted(value, rest, expand_last, out),
            _ => {}
        },
    }
}

/// The document's `_id`, if present.
pub(crate) fn document_id(doc: &Value) -> Option<&Value> {
    doc.get("_id")
}
