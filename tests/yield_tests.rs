use geo2d::{Geo2dIndex, GeoCursor, MemoryCollection, RecordId, SearchConfig};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A 20x20 grid of documents; `_id` is `x * 100 + y`.
fn grid() -> (Arc<Geo2dIndex>, Arc<MemoryCollection>, BTreeMap<u64, RecordId>) {
    let index = Arc::new(
        Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).expect("Failed to create index"),
    );
    let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
    let mut records = BTreeMap::new();
    for x in 0..20u64 {
        for y in 0..20u64 {
            let id = x * 100 + y;
            let record = coll
                .insert(json!({"_id": id, "loc": [x, y], "version": 0}))
                .expect("Failed to insert");
            records.insert(id, record);
        }
    }
    (index, coll, records)
}

fn open(index: &Arc<Geo2dIndex>, coll: &Arc<MemoryCollection>) -> GeoCursor {
    // a small per-call budget forces many refills between yields
    let config = SearchConfig::default().with_max_points_heuristic(7);
    index
        .new_cursor(
            coll.clone(),
            &json!({"loc": {"$within": {"$box": [[0, 0], [19, 19]]}}}),
            0,
            config,
        )
        .expect("Failed to open cursor")
}

/// Test 1: documents deleted while the cursor is suspended are never returned
#[test]
fn test_deletes_between_batches() {
    init_logging();
    let (index, coll, records) = grid();
    let mut cursor = open(&index, &coll);

    let mut returned = Vec::new();
    let mut deleted = BTreeSet::new();
    let mut batch = 0;

    loop {
        let mut exhausted = true;
        for result in cursor.by_ref().take(25) {
            exhausted = false;
            let id = result.expect("Cursor failed").document["_id"]
                .as_u64()
                .expect("numeric _id");
            assert!(!deleted.contains(&id), "deleted document {} returned", id);
            returned.push(id);
        }
        if exhausted {
            break;
        }

        cursor.note_location();
        // drop a handful of documents that have not been returned yet
        let victims: Vec<u64> = records
            .keys()
            .copied()
            .filter(|id| !returned.contains(id) && !deleted.contains(id))
            .skip(batch * 3)
            .step_by(11)
            .take(4)
            .collect();
        for id in victims {
            coll.remove(records[&id]).expect("Failed to remove");
            deleted.insert(id);
        }
        cursor.check_location().expect("Failed to resume");
        batch += 1;
    }

    let unique: BTreeSet<u64> = returned.iter().copied().collect();
    assert_eq!(unique.len(), returned.len(), "duplicate results");

    let expected: BTreeSet<u64> = records
        .keys()
        .copied()
        .filter(|id| !deleted.contains(id))
        .collect();
    assert_eq!(unique, expected);
    assert!(cursor.explain().points_removed_on_yield <= deleted.len() as u64);
}

/// Test 2: in-place updates are visible after resuming
#[test]
fn test_updates_between_batches() {
    init_logging();
    let (index, coll, records) = grid();
    let mut cursor = open(&index, &coll);

    let first = cursor
        .next()
        .expect("at least one result")
        .expect("Cursor failed");
    let mut seen = BTreeSet::from([first.document["_id"].as_u64().expect("numeric _id")]);

    cursor.note_location();
    for (id, record) in &records {
        if !seen.contains(id) {
            let loc = json!([id / 100, id % 100]);
            coll.update(*record, json!({"_id": id, "loc": loc, "version": 1}))
                .expect("Failed to update");
        }
    }
    cursor.check_location().expect("Failed to resume");

    for result in cursor.by_ref() {
        let m = result.expect("Cursor failed");
        let id = m.document["_id"].as_u64().expect("numeric _id");
        assert!(seen.insert(id), "duplicate result {}", id);
        assert_eq!(m.document["version"], 1, "stale document {}", id);
    }
    assert_eq!(seen.len(), records.len());
}

/// Test 3: resuming without any change is a no-op
#[test]
fn test_note_without_changes() {
    init_logging();
    let (index, coll, records) = grid();
    let mut cursor = open(&index, &coll);

    let mut seen = BTreeSet::new();
    loop {
        cursor.note_location();
        cursor.check_location().expect("Failed to resume");
        let Some(result) = cursor.next() else {
            break;
        };
        let id = result.expect("Cursor failed").document["_id"]
            .as_u64()
            .expect("numeric _id");
        assert!(seen.insert(id));
    }
    assert_eq!(seen.len(), records.len());

    let stats = cursor.explain();
    assert_eq!(stats.points_removed_on_yield, 0);
    assert_eq!(stats.points_changed_on_yield, 0);
}
