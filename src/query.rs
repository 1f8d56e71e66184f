//! Turning a query document into a running search.
//!
//! The geo field of the query selects the search:
//!
//! - `{loc: {$near: [x, y], $maxDistance: d}}` and `$nearSphere` run a
//!   k-nearest search,
//! - `{loc: {$within: {$center | $centerSphere | $box | $polygon: ...}}}`
//!   browses a shape,
//! - any other value for the field (`{loc: [x, y]}`) matches documents at
//!   exactly that point.
//!
//! Every other field of the query becomes the secondary [`Filter`].

use crate::compute::{
    DistanceKind, ExplainStats, GeoBrowse, NearCursor, NearSearch, SearchContext, WithinShape,
};
use crate::error::{GeoError, Result};
use crate::filter::{truthy, Filter};
use crate::shapes::GeoBox;
use crate::types::{container_entries, is_container, point_from_value, GeoMatch};
use serde_json::{json, Map, Value};

/// A cursor over the results of a 2d query.
pub enum GeoCursor {
    Within(GeoBrowse),
    Near(NearCursor),
}

impl GeoCursor {
    pub fn is_near(&self) -> bool {
        matches!(self, GeoCursor::Near(_))
    }

    pub fn explain(&self) -> ExplainStats {
        match self {
            GeoCursor::Within(browse) => browse.explain(),
            GeoCursor::Near(near) => near.explain(),
        }
    }

    pub fn index_bounds(&self) -> Vec<GeoBox> {
        match self {
            GeoCursor::Within(browse) => browse.index_bounds(),
            GeoCursor::Near(near) => near.index_bounds().to_vec(),
        }
    }

    /// Prepare for the collection to change underneath the cursor.
    ///
    /// `$near` results are complete once the cursor exists, so only browse
    /// cursors have anything to save.
    pub fn note_location(&mut self) {
        if let GeoCursor::Within(browse) = self {
            browse.note_location();
        }
    }

    pub fn check_location(&mut self) -> Result<()> {
        match self {
            GeoCursor::Within(browse) => browse.check_location(),
            GeoCursor::Near(_) => Ok(()),
        }
    }
}

impl Iterator for GeoCursor {
    type Item = Result<GeoMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            GeoCursor::Within(browse) => browse.next(),
            GeoCursor::Near(near) => near.next(),
        }
    }
}

/// Open a cursor answering `query` with the index in `ctx`.
///
/// `num_wanted` caps `$near` results: zero means the configured default and
/// negative values are taken as their magnitude.
pub fn new_cursor(ctx: SearchContext, query: &Value, num_wanted: i64) -> Result<GeoCursor> {
    let num_wanted = match num_wanted {
        0 => ctx.config.default_num_wanted,
        n => usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX),
    };

    let geo_field = ctx.index.geo_field().to_string();
    let filter = Filter::without_field(query, &geo_field)?;

    let Some(value) = query.get(&geo_field) else {
        return Err(missing_field(&geo_field, query));
    };

    match value {
        Value::Array(_) => exact_point(ctx, value, filter),
        Value::Object(spec) => match spec.iter().next() {
            Some((op, arg)) if op.starts_with("$near") => {
                near_cursor(ctx, spec, op, arg, filter, num_wanted)
            }
            Some((op, arg)) if op == "$within" => within_cursor(ctx, arg, filter),
            _ => exact_point(ctx, value, filter),
        },
        _ => Err(missing_field(&geo_field, query)),
    }
}

fn missing_field(geo_field: &str, query: &Value) -> GeoError {
    GeoError::BadQuery(format!("missing geo field ({}) in : {}", geo_field, query))
}

/// Documents located exactly at `location`.
fn exact_point(ctx: SearchContext, location: &Value, filter: Option<Filter>) -> Result<GeoCursor> {
    let shape = WithinShape::center(
        ctx.index.converter(),
        &json!([location, 0]),
        DistanceKind::Plain,
    )?;
    Ok(GeoCursor::Within(GeoBrowse::new(ctx, shape, filter, true)))
}

fn near_cursor(
    ctx: SearchContext,
    spec: &Map<String, Value>,
    op: &str,
    arg: &Value,
    filter: Option<Filter>,
    num_wanted: usize,
) -> Result<GeoCursor> {
    let kind = match &op["$near".len()..] {
        "" => DistanceKind::Plain,
        "Sphere" => DistanceKind::Sphere,
        _ => {
            return Err(GeoError::BadQuery(format!(
                "invalid $near search type: {}",
                op
            )))
        }
    };

    let near = point_from_value(arg).map_err(GeoError::BadQuery)?;

    let mut max_distance = f64::MAX;
    if is_container(arg) {
        if let Some(d) = container_entries(arg).get(2).and_then(|v| v.as_f64()) {
            max_distance = d;
        }
    }
    if let Some(d) = spec.get("$maxDistance").and_then(Value::as_f64) {
        max_distance = d;
    }
    let unique_docs = spec.get("$uniqueDocs").is_some_and(truthy);

    log::debug!(
        "$near{} query at {} for {} results within {}",
        if kind == DistanceKind::Sphere { "Sphere" } else { "" },
        near,
        num_wanted,
        max_distance
    );

    let cursor = NearSearch::new(ctx, near, num_wanted)?
        .with_filter(filter)
        .with_max_distance(max_distance)
        .with_kind(kind)
        .with_unique_docs(unique_docs)
        .exec()?;
    Ok(GeoCursor::Near(cursor))
}

fn within_cursor(ctx: SearchContext, arg: &Value, filter: Option<Filter>) -> Result<GeoCursor> {
    if !is_container(arg) {
        return Err(GeoError::BadQuery(
            "$within has to take an object or array".into(),
        ));
    }

    let unique_docs = arg.get("$uniqueDocs").map_or(true, truthy);
    let shape_entry = arg
        .as_object()
        .and_then(|context| context.iter().find(|(name, _)| *name != "$uniqueDocs"));
    let Some((shape_type, shape_arg)) = shape_entry else {
        return Err(unknown_shape(arg));
    };

    let converter = ctx.index.converter();
    let shape = if shape_type.starts_with("$center") {
        require_container(shape_arg, "$center")?;
        let kind = match shape_type.as_str() {
            "$center" => DistanceKind::Plain,
            "$centerSphere" => DistanceKind::Sphere,
            other => {
                return Err(GeoError::BadQuery(format!(
                    "invalid $center query type: {}",
                    other
                )))
            }
        };
        WithinShape::center(converter, shape_arg, kind)?
    } else if shape_type == "$box" {
        require_container(shape_arg, "$box")?;
        WithinShape::boxed(converter, shape_arg)?
    } else if shape_type.starts_with("$poly") {
        require_container(shape_arg, "$polygon")?;
        WithinShape::polygon(converter, shape_arg)?
    } else if shape_type == "$geometry" {
        return Err(GeoError::BadQuery(
            "$geometry is not supported by 2d indexes".into(),
        ));
    } else {
        return Err(unknown_shape(arg));
    };

    Ok(GeoCursor::Within(GeoBrowse::new(ctx, shape, filter, unique_docs)))
}

fn require_container(value: &Value, name: &str) -> Result<()> {
    if is_container(value) {
        return Ok(());
    }
    Err(GeoError::BadQuery(format!(
        "{} has to take an object or array",
        name
    )))
}

fn unknown_shape(context: &Value) -> GeoError {
    GeoError::BadQuery(format!(
        "unknown $within information : {}, a shape must be specified.",
        context
    ))
}
