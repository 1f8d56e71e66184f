//! The 2d index descriptor.
//!
//! A [`Geo2dIndex`] knows which document field holds locations, which other
//! fields are carried in compound keys, and how coordinates map onto hashes.
//! It does not store anything itself; storage backends call [`Geo2dIndex::keys`]
//! to learn what to index.

use crate::compute::{Interrupt, SearchContext};
use crate::config::{IndexOptions, SearchConfig};
use crate::converter::GeoHashConverter;
use crate::error::{GeoError, Result};
use crate::hash::GeoHash;
use crate::query::{self, GeoCursor};
use crate::shapes::Point;
use crate::storage::IndexBackend;
use crate::types::{
    container_entries, fields_dotted, first_entry, is_container, is_empty_container,
    point_from_value, Suitability,
};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::sync::Arc;

/// Name of the index type in key patterns.
pub const GEO_2D: &str = "2d";

/// Locations found in one document. Almost always a single point.
pub type Locations = SmallVec<[Point; 2]>;

/// A 2d index over one location field, optionally compounded with other fields.
///
/// # Examples
///
/// ```rust
/// use geo2d::Geo2dIndex;
/// use serde_json::json;
///
/// let index = Geo2dIndex::new(&json!({"loc": "2d", "category": 1}), &json!({"bits": 20})).unwrap();
/// assert_eq!(index.geo_field(), "loc");
/// assert_eq!(index.converter().bits(), 20);
///
/// let keys = index.keys(&json!({"loc": [10, 20], "category": "cafe"})).unwrap();
/// assert_eq!(keys.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Geo2dIndex {
    geo_field: String,
    other_fields: Vec<(String, i32)>,
    key_pattern: Value,
    converter: GeoHashConverter,
}

/// One index key produced for a document: the location hash plus the
/// values of the compound fields, in key pattern order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey {
    pub hash: GeoHash,
    pub other: Vec<Value>,
}

impl Geo2dIndex {
    /// Build an index from a key pattern such as `{"loc": "2d", "type": 1}`
    /// and an info object carrying `bits`, `min` and `max`.
    pub fn new(key_pattern: &Value, info: &Value) -> Result<Self> {
        let Some(pattern) = key_pattern.as_object() else {
            return Err(GeoError::InvalidIndexSpec(format!(
                "key pattern must be an object, got: {}",
                key_pattern
            )));
        };

        let mut geo_field: Option<String> = None;
        let mut other_fields = Vec::new();

        for (name, spec) in pattern {
            if spec.as_str() == Some(GEO_2D) {
                if geo_field.is_some() {
                    return Err(GeoError::InvalidIndexSpec("can't have 2 geo field".into()));
                }
                if !other_fields.is_empty() {
                    return Err(GeoError::InvalidIndexSpec("2d has to be first in index".into()));
                }
                geo_field = Some(name.clone());
            } else {
                let order = spec.as_f64().map(|o| o as i32).unwrap_or(1);
                other_fields.push((name.clone(), order));
            }
        }

        let Some(geo_field) = geo_field else {
            return Err(GeoError::InvalidIndexSpec("no geo field specified".into()));
        };

        let converter = GeoHashConverter::new(IndexOptions::from_spec_info(info)?)?;

        log::debug!(
            "created 2d index on '{}' ({} compound fields, {} bits)",
            geo_field,
            other_fields.len(),
            converter.bits()
        );

        Ok(Self {
            geo_field,
            other_fields,
            key_pattern: key_pattern.clone(),
            converter,
        })
    }

    /// Shorthand for a plain `{field: "2d"}` index with the given options.
    pub fn for_field(field: &str, options: IndexOptions) -> Result<Self> {
        let mut pattern = Map::new();
        pattern.insert(field.to_string(), Value::String(GEO_2D.into()));
        let info = serde_json::to_value(options)?;
        Self::new(&Value::Object(pattern), &info)
    }

    pub fn geo_field(&self) -> &str {
        &self.geo_field
    }

    /// Compound fields after the location, with their sort direction.
    pub fn other_fields(&self) -> &[(String, i32)] {
        &self.other_fields
    }

    pub fn key_pattern(&self) -> &Value {
        &self.key_pattern
    }

    pub fn converter(&self) -> &GeoHashConverter {
        &self.converter
    }

    /// Every location stored in `doc`.
    ///
    /// Accepts a single location (`[x, y]` or `{a: x, b: y}`), or an array or
    /// object of locations. Empty locations are ignored.
    pub fn locations(&self, doc: &Value) -> Result<Locations> {
        let mut out = Locations::new();

        for geo in fields_dotted(doc, &self.geo_field, false) {
            if !is_container(geo) || is_empty_container(geo) {
                continue;
            }

            // A number up front means this is one location, not a list of them.
            let single = first_entry(geo).is_some_and(Value::is_number);
            if single {
                out.push(point_from_value(geo).map_err(GeoError::InvalidDocument)?);
                continue;
            }

            for loc in container_entries(geo) {
                if !is_container(loc) {
                    return Err(GeoError::InvalidDocument(
                        "location object expected, location array not in correct format".into(),
                    ));
                }
                if is_empty_container(loc) {
                    continue;
                }
                out.push(point_from_value(loc).map_err(GeoError::InvalidDocument)?);
            }
        }

        Ok(out)
    }

    /// The index keys for `doc`, one per distinct location hash.
    pub fn keys(&self, doc: &Value) -> Result<Vec<IndexKey>> {
        let locations = self.locations(doc)?;
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let other = self.other_values(doc);
        let mut keys: Vec<IndexKey> = Vec::with_capacity(locations.len());
        for loc in &locations {
            let hash = self
                .converter
                .hash_point(loc)
                .map_err(|e| GeoError::InvalidDocument(format!("{} in document {}", e, doc)))?;
            if keys.iter().any(|k| k.hash == hash) {
                continue;
            }
            keys.push(IndexKey {
                hash,
                other: other.clone(),
            });
        }
        Ok(keys)
    }

    fn other_values(&self, doc: &Value) -> Vec<Value> {
        self.other_fields
            .iter()
            .map(|(field, _)| {
                let mut found: Vec<Value> = Vec::new();
                for v in fields_dotted(doc, field, true) {
                    if !found.contains(v) {
                        found.push(v.clone());
                    }
                }
                match found.len() {
                    0 => Value::Null,
                    1 => found.remove(0),
                    _ => Value::Array(found),
                }
            })
            .collect()
    }

    /// How well this index can answer `query`.
    pub fn suitability(&self, query: &Value) -> Suitability {
        let Some(field) = query.get(&self.geo_field) else {
            return Suitability::Useless;
        };

        match field {
            Value::Object(sub) => {
                let Some((op, arg)) = sub.iter().next() else {
                    return Suitability::Helpful;
                };
                if op.starts_with("$near") {
                    return Suitability::Optimal;
                }
                if op == "$within" {
                    if arg.as_object().is_some_and(|o| o.contains_key("$geometry")) {
                        return Suitability::Useless;
                    }
                    return Suitability::Optimal;
                }
                Suitability::Helpful
            }
            Value::Array(_) => Suitability::Helpful,
            _ => Suitability::Useless,
        }
    }

    /// Convert a query value into a key hash: a location is hashed, a bit
    /// string is parsed as a hash.
    pub fn fix_key(&self, value: &Value) -> Result<GeoHash> {
        match value {
            Value::String(bits) => bits.parse(),
            v if is_container(v) => {
                let p = point_from_value(v).map_err(GeoError::BadQuery)?;
                self.converter.hash_point(&p)
            }
            other => Err(GeoError::BadQuery(format!(
                "can't convert {} into a geo key",
                other
            ))),
        }
    }

    /// Open a cursor for `query` over `backend`.
    ///
    /// `num_wanted` caps `$near` results; zero means the configured default
    /// and negative values are taken as their magnitude.
    pub fn new_cursor(
        self: &Arc<Self>,
        backend: Arc<dyn IndexBackend>,
        query: &Value,
        num_wanted: i64,
        config: SearchConfig,
    ) -> Result<GeoCursor> {
        let ctx = SearchContext::new(backend, Arc::clone(self))
            .with_config(config)
            .with_interrupt(Interrupt::new());
        query::new_cursor(ctx, query, num_wanted)
    }
}
