//! Candidate admission shared by every search.
//!
//! Each key is first checked against its approximate (decoded) location. Keys
//! that pass have their document run through the secondary filter once; the
//! verdict is cached per record for the rest of the scan.

use super::shape::KeyResult;
use super::SearchContext;
use crate::error::Result;
use crate::filter::Filter;
use crate::hash::GeoHash;
use crate::index::Geo2dIndex;
use crate::shapes::Point;
use crate::storage::IndexEntry;
use crate::types::{Document, RecordId};
use rustc_hash::FxHashMap;

/// A key that survived the approximate check and the filter.
#[derive(Debug)]
pub(crate) struct Admitted {
    pub key_point: Point,
    /// The key is too close to the shape boundary to decide without the document.
    pub on_bounds: bool,
    pub key_distance: f64,
    /// First time this record is seen since the last yield.
    pub new_doc: bool,
    pub document: Document,
}

#[derive(Debug)]
pub(crate) struct Accumulator {
    pub looked_at: u64,
    pub matches_performed: u64,
    pub objects_loaded: u64,
    pub points_loaded: u64,
    pub found: i64,
    matched: FxHashMap<RecordId, bool>,
    filter: Option<Filter>,
    pub unique_docs: bool,
    pub need_distance: bool,
}

impl Accumulator {
    pub(crate) fn new(filter: Option<Filter>, unique_docs: bool, need_distance: bool) -> Self {
        Self {
            looked_at: 0,
            matches_performed: 0,
            objects_loaded: 0,
            points_loaded: 0,
            found: 0,
            matched: FxHashMap::default(),
            filter,
            unique_docs,
            need_distance,
        }
    }

    /// Run the approximate check and the filter for one index entry.
    pub(crate) fn admit<F>(
        &mut self,
        ctx: &SearchContext,
        entry: &IndexEntry,
        approx_check: F,
    ) -> Result<Option<Admitted>>
    where
        F: FnOnce(&Point) -> Result<(KeyResult, f64)>,
    {
        self.looked_at += 1;

        let key_point = ctx.index.converter().unhash_to_point(&entry.hash);
        let (result, key_distance) = approx_check(&key_point)?;
        if result == KeyResult::Bad {
            log::trace!("bad distance for {} at {}", entry.record, key_point);
            return Ok(None);
        }

        let new_doc = match self.matched.get(&entry.record) {
            None => true,
            Some(true) => false,
            Some(false) => {
                log::trace!("{} previously didn't match", entry.record);
                return Ok(None);
            }
        };

        let Some(document) = ctx.backend.fetch(entry.record)? else {
            self.matched.insert(entry.record, false);
            return Ok(None);
        };

        if new_doc {
            self.objects_loaded += 1;
            if let Some(filter) = &self.filter {
                self.matches_performed += 1;
                if !filter.matches(&document) {
                    self.matched.insert(entry.record, false);
                    return Ok(None);
                }
            }
            self.matched.insert(entry.record, true);
        }

        Ok(Some(Admitted {
            key_point,
            on_bounds: result == KeyResult::Border,
            key_distance,
            new_doc,
            document,
        }))
    }

    /// Locations of `doc` to test for a key: every location with `all`, or
    /// only those hashing to `key`.
    pub(crate) fn points_for(
        &mut self,
        index: &Geo2dIndex,
        key: &GeoHash,
        doc: &Document,
        all: bool,
    ) -> Result<Vec<Point>> {
        let locations = index.locations(doc)?;
        self.points_loaded += 1;

        if all || locations.len() == 1 {
            return Ok(locations.to_vec());
        }

        let converter = index.converter();
        Ok(locations
            .into_iter()
            .filter(|p| converter.hash_point(p).is_ok_and(|h| h == *key))
            .collect())
    }

    /// Carry a cached filter verdict over to a record's new id.
    pub(crate) fn fix_matches(&mut self, old: RecordId, new: RecordId) {
        if let Some(verdict) = self.matched.remove(&old) {
            self.matched.insert(new, verdict);
        }
    }

    /// Forget cached verdicts; records may change while the cursor is suspended.
    pub(crate) fn clear_matches(&mut self) {
        self.matched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IndexBackend, KeyRange, MemoryCollection};
    use crate::types::Direction;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (SearchContext, Vec<IndexEntry>) {
        let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
        let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
        coll.insert(json!({"_id": 1, "loc": [[1, 1], [2, 2]], "kind": "a"})).unwrap();
        coll.insert(json!({"_id": 2, "loc": [3, 3], "kind": "b"})).unwrap();

        let mut entries = Vec::new();
        let mut after = None;
        while let Some(e) = coll.seek(&KeyRange::all(), Direction::Forward, after).unwrap() {
            after = Some(e.position());
            entries.push(e);
        }
        (SearchContext::new(coll, index), entries)
    }

    #[test]
    fn test_bad_keys_skip_documents() {
        let (ctx, entries) = setup();
        let mut acc = Accumulator::new(None, true, false);
        let out = acc
            .admit(&ctx, &entries[0], |_| Ok((KeyResult::Bad, 0.0)))
            .unwrap();
        assert!(out.is_none());
        assert_eq!(acc.looked_at, 1);
        assert_eq!(acc.objects_loaded, 0);
    }

    #[test]
    fn test_filter_cached_per_record() {
        let (ctx, entries) = setup();
        let filter = Filter::parse(&json!({"kind": "a"})).unwrap();
        let mut acc = Accumulator::new(Some(filter), true, false);

        let mut admitted = 0;
        for e in &entries {
            if let Some(a) = acc.admit(&ctx, e, |_| Ok((KeyResult::Good, 0.0))).unwrap() {
                admitted += 1;
                assert_eq!(a.document["kind"], "a");
            }
        }
        // two keys for the first document, one for the second
        assert_eq!(admitted, 2);
        assert_eq!(acc.matches_performed, 2);
        assert_eq!(acc.objects_loaded, 2);
        assert_eq!(acc.looked_at, 3);
    }

    #[test]
    fn test_new_doc_only_once() {
        let (ctx, entries) = setup();
        let mut acc = Accumulator::new(None, true, false);
        let first_doc: Vec<&IndexEntry> =
            entries.iter().filter(|e| e.record == entries[0].record).collect();
        assert_eq!(first_doc.len(), 2);

        let a = acc.admit(&ctx, first_doc[0], |_| Ok((KeyResult::Border, 1.0))).unwrap().unwrap();
        assert!(a.new_doc && a.on_bounds);
        let b = acc.admit(&ctx, first_doc[1], |_| Ok((KeyResult::Good, 1.0))).unwrap().unwrap();
        assert!(!b.new_doc && !b.on_bounds);

        acc.clear_matches();
        let c = acc.admit(&ctx, first_doc[1], |_| Ok((KeyResult::Good, 1.0))).unwrap().unwrap();
        assert!(c.new_doc);
    }

    #[test]
    fn test_points_for() {
        let (ctx, entries) = setup();
        let mut acc = Accumulator::new(None, true, false);
        let doc = ctx.backend.fetch(entries[0].record).unwrap().unwrap();

        let all = acc.points_for(&ctx.index, &entries[0].hash, &doc, true).unwrap();
        assert_eq!(all.len(), 2);
        let keyed = acc.points_for(&ctx.index, &entries[0].hash, &doc, false).unwrap();
        assert_eq!(keyed, vec![Point::new(1.0, 1.0)]);
        assert_eq!(acc.points_loaded, 2);
    }

    #[test]
    fn test_fix_matches() {
        let mut acc = Accumulator::new(None, true, false);
        acc.matched.insert(RecordId(1), false);
        acc.fix_matches(RecordId(1), RecordId(9));
        assert_eq!(acc.matched.get(&RecordId(9)), Some(&false));
        assert!(!acc.matched.contains_key(&RecordId(1)));
    }
}
