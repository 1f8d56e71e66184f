use geo2d::{GeoError, Geo2dIndex, GeoHash, MemoryCollection, SearchConfig};
use serde_json::{json, Value};
use std::sync::Arc;

fn collection(info: Value, docs: Vec<Value>) -> (Arc<Geo2dIndex>, Arc<MemoryCollection>) {
    let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &info).expect("Failed to create index"));
    let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
    for doc in docs {
        coll.insert(doc).expect("Failed to insert");
    }
    (index, coll)
}

fn ids(index: &Arc<Geo2dIndex>, coll: &Arc<MemoryCollection>, query: Value, num: i64) -> Vec<Value> {
    index
        .new_cursor(coll.clone(), &query, num, SearchConfig::default())
        .expect("Failed to open cursor")
        .map(|r| r.expect("Cursor failed").document["_id"].clone())
        .collect()
}

/// Test 1: points on the edge of the coordinate domain
#[test]
fn test_domain_corners() {
    let (index, coll) = collection(
        json!({}),
        vec![
            json!({"_id": "sw", "loc": [-180, -180]}),
            json!({"_id": "ne", "loc": [179.999, 179.999]}),
            json!({"_id": "mid", "loc": [0, 0]}),
        ],
    );
    assert_eq!(ids(&index, &coll, json!({"loc": {"$near": [-179, -179]}}), 1), vec![json!("sw")]);
    assert_eq!(ids(&index, &coll, json!({"loc": {"$near": [179, 179]}}), 1), vec![json!("ne")]);
    assert_eq!(ids(&index, &coll, json!({"loc": {"$near": [1, 1]}}), 3).len(), 3);
}

/// Test 2: locations outside the domain are rejected on insert and query
#[test]
fn test_out_of_bounds() {
    let (index, coll) = collection(json!({"min": 0, "max": 100}), vec![]);
    let err = coll.insert(json!({"_id": 1, "loc": [150, 5]})).unwrap_err();
    assert!(matches!(err, GeoError::InvalidDocument(_)));
    assert!(err.to_string().contains("point not in interval"));

    let err = index
        .new_cursor(coll.clone(), &json!({"loc": {"$near": [-5, 5]}}), 1, SearchConfig::default())
        .err()
        .expect("query outside the domain");
    assert!(matches!(err, GeoError::OutOfBounds(_)));
}

/// Test 3: empty collections answer every query form
#[test]
fn test_empty_collection() {
    let (index, coll) = collection(json!({}), vec![]);
    assert!(ids(&index, &coll, json!({"loc": {"$near": [0, 0]}}), 10).is_empty());
    assert!(ids(&index, &coll, json!({"loc": {"$within": {"$center": [[0, 0], 5]}}}), 0).is_empty());
    assert!(ids(&index, &coll, json!({"loc": [0, 0]}), 0).is_empty());
}

/// Test 4: many documents sharing one location
#[test]
fn test_shared_location() {
    let docs = (0..40).map(|i| json!({"_id": i, "loc": [12.5, -3.25]})).collect();
    let (index, coll) = collection(json!({}), docs);
    assert_eq!(ids(&index, &coll, json!({"loc": {"$near": [0, 0]}}), 15).len(), 15);
    assert_eq!(ids(&index, &coll, json!({"loc": [12.5, -3.25]}), 0).len(), 40);
}

/// Test 5: low precision indexes still return exact answers
#[test]
fn test_coarse_bits() {
    let docs = (0..50).map(|i| json!({"_id": i, "loc": [i as f64 * 0.1, 0]})).collect();
    let (index, coll) = collection(json!({"bits": 4}), docs);
    let near = ids(&index, &coll, json!({"loc": {"$near": [2.04, 0]}}), 3);
    assert_eq!(near, vec![json!(20), json!(21), json!(19)]);

    let within = ids(&index, &coll, json!({"loc": {"$within": {"$box": [[0.95, -1], [1.25, 1]]}}}), 0);
    let mut within: Vec<i64> = within.iter().filter_map(Value::as_i64).collect();
    within.sort();
    assert_eq!(within, vec![10, 11, 12]);
}

/// Test 6: malformed shapes
#[test]
fn test_malformed_shapes() {
    let (index, coll) = collection(json!({}), vec![json!({"_id": 1, "loc": [0, 0]})]);
    let open = |q: Value| {
        index
            .new_cursor(coll.clone(), &q, 0, SearchConfig::default())
            .err()
            .expect("query should fail")
            .to_string()
    };

    assert!(open(json!({"loc": {"$within": {"$box": [[0, 0]]}}})).contains("$box needs 2 fields"));
    assert!(open(json!({"loc": {"$within": {"$box": [[0, 0], [0, 5]]}}})).contains("area > 0"));
    assert!(open(json!({"loc": {"$within": {"$center": [[0, 0], -1]}}})).contains("max distance >= 0"));
    assert!(open(json!({"loc": {"$within": {"$polygon": [[0, 0], [1, 1]]}}})).contains("three points"));
    assert!(open(json!({"loc": {"$within": {"$centerSphere": [[0, 0], 4]}}})).contains("radians"));
    assert!(open(json!({"loc": {"$near": "here"}})).contains("location must be"));
}

/// Test 7: documents with unusable locations are rejected, missing ones skipped
#[test]
fn test_document_validation() {
    let (index, coll) = collection(json!({}), vec![]);
    assert!(coll.insert(json!({"_id": 1, "loc": [1]})).is_err());
    assert!(coll.insert(json!({"_id": 2, "loc": ["a", "b"]})).is_err());

    coll.insert(json!({"_id": 3})).expect("no location is fine");
    coll.insert(json!({"_id": 4, "loc": [1, 1]})).expect("insert");
    assert_eq!(ids(&index, &coll, json!({"loc": {"$near": [0, 0]}}), 10), vec![json!(4)]);
}

/// Test 8: bit-string hashes round trip through the query key helper
#[test]
fn test_fix_key() {
    let index = Geo2dIndex::new(&json!({"loc": "2d"}), &json!({"bits": 8})).expect("index");
    let from_point = index.fix_key(&json!([10, 20])).expect("point key");
    let from_bits = index.fix_key(&json!(from_point.to_string())).expect("bit string key");
    assert_eq!(from_point, from_bits);
    assert_eq!(from_bits.to_string().parse::<GeoHash>().expect("parse"), from_point);
    assert!(index.fix_key(&json!(5)).is_err());
}

/// Test 9: circles on low precision indexes refine no deeper than the index bits
#[test]
fn test_coarse_bits_circle() {
    let mut docs = Vec::new();
    for i in 0..33 {
        for j in 0..33 {
            let (x, y) = (-40.3 + i as f64 * 2.5, -40.7 + j as f64 * 2.5);
            docs.push(json!({"_id": i * 100 + j, "loc": [x, y]}));
        }
    }

    for bits in 2..=8 {
        let (index, coll) = collection(json!({"bits": bits}), docs.clone());
        for (cx, cy, r) in [(3.3, -2.1, 7.3), (-20.2, 15.6, 11.9), (0.4, 0.9, 31.7)] {
            let found = ids(&index, &coll, json!({"loc": {"$within": {"$center": [[cx, cy], r]}}}), 0);
            let mut found: Vec<i64> = found.iter().filter_map(Value::as_i64).collect();
            found.sort();

            let mut expected: Vec<i64> = docs
                .iter()
                .filter(|d| {
                    let (x, y) = (d["loc"][0].as_f64().unwrap(), d["loc"][1].as_f64().unwrap());
                    ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() <= r
                })
                .map(|d| d["_id"].as_i64().unwrap())
                .collect();
            expected.sort();
            assert!(!expected.is_empty());
            assert_eq!(found, expected, "bits {} center ({}, {}) radius {}", bits, cx, cy, r);
        }
    }
}
