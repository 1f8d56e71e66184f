//! Database commands served by a 2d index.
//!
//! [`geo_near`] runs a k-nearest search and reports every result with its
//! distance plus search statistics. [`geo_walk`] dumps the index in key order
//! for diagnostics.

use crate::compute::{DistanceKind, NearSearch, SearchContext};
use crate::config::SearchConfig;
use crate::error::{GeoError, Result};
use crate::filter::{truthy, Filter};
use crate::hash::GeoHash;
use crate::index::Geo2dIndex;
use crate::storage::{IndexBackend, KeyRange};
use crate::types::{document_id, get_dotted, point_from_value, Direction, Document};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_WALK_LIMIT: usize = 100_000;

/// Arguments of the `geoNear` command.
///
/// # Examples
///
/// ```rust
/// use geo2d::command::GeoNearRequest;
/// use serde_json::json;
///
/// let request = GeoNearRequest::from_command(&json!({
///     "near": [10, 20],
///     "num": 5,
///     "spherical": 1,
///     "query": {"kind": "cafe"}
/// }))
/// .unwrap();
/// assert!(request.spherical);
/// assert_eq!(request.num, Some(5.0));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoNearRequest {
    #[serde(default)]
    pub near: Option<Value>,
    #[serde(default)]
    pub num: Option<f64>,
    /// Used when `num` is absent.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub max_distance: Option<f64>,
    #[serde(default, deserialize_with = "flag")]
    pub spherical: bool,
    #[serde(default, deserialize_with = "flag")]
    pub unique_docs: bool,
    #[serde(default, deserialize_with = "flag")]
    pub include_locs: bool,
    #[serde(default)]
    pub distance_multiplier: Option<f64>,
    /// Bit string of the cell to start expanding from.
    #[serde(default)]
    pub start: Option<String>,
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(truthy(&value))
}

impl GeoNearRequest {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            near: Some(Value::from(vec![x, y])),
            ..Self::default()
        }
    }

    /// Parse a command document.
    pub fn from_command(cmd: &Value) -> Result<Self> {
        Ok(serde_json::from_value(cmd.clone())?)
    }

    pub fn with_num(mut self, num: usize) -> Self {
        self.num = Some(num as f64);
        self
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    pub fn with_spherical(mut self, spherical: bool) -> Self {
        self.spherical = spherical;
        self
    }

    pub fn with_unique_docs(mut self, unique_docs: bool) -> Self {
        self.unique_docs = unique_docs;
        self
    }

    pub fn with_include_locs(mut self, include_locs: bool) -> Self {
        self.include_locs = include_locs;
        self
    }

    pub fn with_distance_multiplier(mut self, multiplier: f64) -> Self {
        self.distance_multiplier = Some(multiplier);
        self
    }

    fn num_wanted(&self, default: usize) -> Result<usize> {
        let Some(num) = self.num.or(self.limit) else {
            return Ok(default);
        };
        if !(num >= 0.0) {
            return Err(GeoError::BadQuery(format!("num must be >= 0, got {}", num)));
        }
        Ok(num as usize)
    }
}

/// One `geoNear` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoNearResult {
    pub dis: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<[f64; 2]>,
    pub obj: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoNearStats {
    /// Milliseconds spent in the command.
    pub time: u64,
    pub btreelocs: i64,
    pub nscanned: u64,
    pub objects_loaded: u64,
    pub avg_distance: f64,
    pub max_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoNearResponse {
    /// Hash of the query point as a bit string.
    pub near: String,
    pub results: Vec<GeoNearResult>,
    pub stats: GeoNearStats,
}

/// Run `geoNear` against `backend` with a fresh search context.
pub fn geo_near(
    index: &Arc<Geo2dIndex>,
    backend: Arc<dyn IndexBackend>,
    request: &GeoNearRequest,
    config: &SearchConfig,
) -> Result<GeoNearResponse> {
    let ctx = SearchContext::new(backend, Arc::clone(index)).with_config(config.clone());
    geo_near_with(ctx, request)
}

/// Run `geoNear` in an existing context, e.g. one carrying an interrupt.
pub fn geo_near_with(ctx: SearchContext, request: &GeoNearRequest) -> Result<GeoNearResponse> {
    let started = Instant::now();

    let near = match &request.near {
        None | Some(Value::Null) => {
            return Err(GeoError::BadQuery("'near' param missing/invalid".into()))
        }
        Some(value) => point_from_value(value)
            .map_err(|e| GeoError::BadQuery(format!("'near' param missing/invalid: {}", e)))?,
    };
    let near_hash = ctx.index.converter().hash_point(&near)?.to_string();

    let filter = match &request.query {
        Some(query @ Value::Object(_)) => Some(Filter::parse(query)?).filter(|f| !f.is_empty()),
        _ => None,
    };
    let kind = if request.spherical {
        DistanceKind::Sphere
    } else {
        DistanceKind::Plain
    };
    let max_result_bytes = ctx.config.max_result_bytes;
    let num_wanted = request.num_wanted(ctx.config.default_num_wanted)?;

    let mut search = NearSearch::new(ctx, near, num_wanted)?
        .with_filter(filter)
        .with_max_distance(request.max_distance.unwrap_or(f64::MAX))
        .with_kind(kind)
        .with_unique_docs(request.unique_docs)
        .with_need_distance(true);
    if let Some(start) = &request.start {
        search = search.with_start(start.parse::<GeoHash>()?);
    }
    let mut cursor = search.exec()?;

    let multiplier = request.distance_multiplier.unwrap_or(1.0);
    let mut results = Vec::with_capacity(cursor.remaining());
    let mut total_distance = 0.0;
    let mut size = 0usize;

    for m in cursor.by_ref() {
        let m = m?;
        let dis = multiplier * m.distance.unwrap_or(0.0);
        total_distance += dis;

        let result = GeoNearResult {
            dis,
            loc: request
                .include_locs
                .then_some(m.location)
                .flatten()
                .map(|p| [p.x, p.y]),
            obj: m.document,
        };
        size += serde_json::to_vec(&result)?.len();
        results.push(result);

        if size > max_result_bytes {
            log::warn!("too many results to fit in a single response, truncating at {}", results.len());
            break;
        }
    }

    let explain = cursor.explain();
    let avg_distance = if results.is_empty() {
        0.0
    } else {
        total_distance / results.len() as f64
    };

    log::debug!(
        "geoNear returned {} results, looked at {} keys",
        results.len(),
        explain.looked_at
    );

    Ok(GeoNearResponse {
        near: near_hash,
        results,
        stats: GeoNearStats {
            time: started.elapsed().as_millis() as u64,
            btreelocs: cursor.found_in_exp(),
            nscanned: explain.looked_at,
            objects_loaded: explain.objects_loaded,
            avg_distance,
            max_distance: cursor.farthest(),
        },
    })
}

/// One index entry as reported by [`geo_walk`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoWalkEntry {
    /// Key hash as a bit string.
    pub hash: String,
    pub hash_hex: String,
    /// The document's geo field as stored.
    pub location: Value,
    pub id: Value,
}

/// List index entries in key order, at most `limit` (100000 by default).
pub fn geo_walk(
    index: &Geo2dIndex,
    backend: &dyn IndexBackend,
    limit: Option<usize>,
) -> Result<Vec<GeoWalkEntry>> {
    let limit = limit.unwrap_or(DEFAULT_WALK_LIMIT);
    let range = KeyRange::all();

    let mut entries = Vec::new();
    let mut after = None;
    while entries.len() < limit {
        let Some(entry) = backend.seek(&range, Direction::Forward, after)? else {
            break;
        };
        after = Some(entry.position());

        let doc = backend.fetch(entry.record)?.unwrap_or(Value::Null);
        entries.push(GeoWalkEntry {
            hash: entry.hash.to_string(),
            hash_hex: format!("{:x}", entry.hash.hash()),
            location: get_dotted(&doc, index.geo_field()).cloned().unwrap_or(Value::Null),
            id: document_id(&doc).cloned().unwrap_or(Value::Null),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCollection;
    use serde_json::json;

    fn setup() -> (Arc<Geo2dIndex>, Arc<MemoryCollection>) {
        let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
        let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
        for (id, x, y) in [(1, 0, 0), (2, 3, 4), (3, 6, 8), (4, 30, 40)] {
            coll.insert(json!({"_id": id, "loc": [x, y], "n": id})).unwrap();
        }
        (index, coll)
    }

    fn run(request: &GeoNearRequest) -> Result<GeoNearResponse> {
        let (index, coll) = setup();
        geo_near(&index, coll, request, &SearchConfig::default())
    }

    #[test]
    fn test_geo_near_uses_configured_default_num() {
        let (index, coll) = setup();
        let config = SearchConfig::default().with_default_num_wanted(2);
        let response = geo_near(&index, coll, &GeoNearRequest::new(0.0, 0.0), &config).unwrap();
        assert_eq!(response.results.len(), 2);

        let response = run(&GeoNearRequest::new(0.0, 0.0)).unwrap();
        assert_eq!(response.results.len(), 4);
    }

    #[test]
    fn test_geo_near_distances() {
        let response = run(&GeoNearRequest::new(0.0, 0.0).with_num(3)).unwrap();
        let ids: Vec<&Value> = response.results.iter().map(|r| &r.obj["_id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3)]);

        let dis: Vec<f64> = response.results.iter().map(|r| r.dis).collect();
        assert!(dis[0].abs() < 1e-9);
        assert!((dis[1] - 5.0).abs() < 1e-9);
        assert!((dis[2] - 10.0).abs() < 1e-9);
        assert!((response.stats.avg_distance - 5.0).abs() < 1e-9);
        assert!(response.results.iter().all(|r| r.loc.is_none()));
        assert_eq!(response.near.len(), 52);
        assert!(response.stats.nscanned >= 3);
        assert!(response.stats.objects_loaded >= 3);
    }

    #[test]
    fn test_geo_near_options() {
        let request = GeoNearRequest::new(0.0, 0.0)
            .with_max_distance(6.0)
            .with_include_locs(true)
            .with_distance_multiplier(2.0);
        let response = run(&request).unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[1].loc, Some([3.0, 4.0]));
        assert!((response.results[1].dis - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_geo_near_spherical() {
        let request = GeoNearRequest::new(0.0, 0.0)
            .with_spherical(true)
            .with_unique_docs(true)
            .with_num(2);
        let response = run(&request).unwrap();
        assert_eq!(response.results.len(), 2);
        let expected = crate::shapes::spheredist_deg(
            &crate::shapes::Point::new(0.0, 0.0),
            &crate::shapes::Point::new(3.0, 4.0),
        );
        assert!((response.results[1].dis - expected).abs() < 1e-9);
    }

    #[test]
    fn test_geo_near_query_filter() {
        let request = GeoNearRequest::new(0.0, 0.0).with_query(json!({"n": {"$gte": 3}}));
        let response = run(&request).unwrap();
        let ids: Vec<&Value> = response.results.iter().map(|r| &r.obj["_id"]).collect();
        assert_eq!(ids, vec![&json!(3), &json!(4)]);
    }

    #[test]
    fn test_geo_near_from_command() {
        let request = GeoNearRequest::from_command(&json!({
            "near": {"lng": 0, "lat": 0},
            "limit": 1,
            "includeLocs": true,
            "uniqueDocs": 0
        }))
        .unwrap();
        assert!(!request.unique_docs);
        let response = run(&request).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].loc, Some([0.0, 0.0]));

        let body = serde_json::to_value(&response).unwrap();
        assert!(body["stats"].get("objectsLoaded").is_some());
        assert!(body["stats"].get("avgDistance").is_some());
    }

    #[test]
    fn test_geo_near_missing_near() {
        let err = run(&GeoNearRequest::default()).unwrap_err();
        assert!(err.to_string().contains("'near' param missing/invalid"));
        let err = run(&GeoNearRequest::from_command(&json!({"near": 5})).unwrap()).unwrap_err();
        assert!(matches!(err, GeoError::BadQuery(_)));
    }

    #[test]
    fn test_geo_near_empty() {
        let response = run(&GeoNearRequest::new(0.0, 0.0).with_num(0)).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.stats.avg_distance, 0.0);
    }

    #[test]
    fn test_geo_near_truncates() {
        let (index, coll) = setup();
        let config = SearchConfig::default().with_max_result_bytes(10);
        let response = geo_near(&index, coll, &GeoNearRequest::new(0.0, 0.0), &config).unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[test]
    fn test_geo_near_start_hash() {
        let (index, coll) = setup();
        let cell = index.converter().hash(1.0, 1.0).unwrap().to_string();
        let request = GeoNearRequest {
            start: Some(cell[..8].to_string()),
            ..GeoNearRequest::new(0.0, 0.0).with_num(2)
        };
        let response = geo_near(&index, coll, &request, &SearchConfig::default()).unwrap();
        let ids: Vec<&Value> = response.results.iter().map(|r| &r.obj["_id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2)]);

        let bad = GeoNearRequest {
            start: Some("012".to_string()),
            ..GeoNearRequest::new(0.0, 0.0)
        };
        assert!(run(&bad).is_err());
    }

    #[test]
    fn test_geo_walk() {
        let (index, coll) = setup();
        let entries = geo_walk(&index, coll.as_ref(), None).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries.windows(2).all(|w| w[0].hash <= w[1].hash));
        let first = entries.iter().find(|e| e.id == json!(1)).unwrap();
        assert_eq!(first.location, json!([0, 0]));
        assert_eq!(first.hash.len(), 52);
        assert_eq!(
            u64::from_str_radix(&first.hash_hex, 16).unwrap(),
            index.converter().hash(0.0, 0.0).unwrap().hash()
        );

        assert_eq!(geo_walk(&index, coll.as_ref(), Some(2)).unwrap().len(), 2);
    }
}
