//! Candidate results and their yield bookkeeping.

use crate::error::Result;
use crate::hash::GeoHash;
use crate::shapes::Point;
use crate::storage::{IndexBackend, IndexEntry, IndexPosition};
use crate::types::{document_id, Document, GeoMatch, RecordId};
use serde_json::Value;

/// What happened to a saved point while the cursor was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relocation {
    Same,
    Moved { from: RecordId },
    Vanished,
}

/// A candidate result.
///
/// While clean it carries the fetched document. [`GeoPoint::make_dirty`]
/// drops the document and remembers the `_id` instead, so the point can be
/// found again after the collection changed.
#[derive(Debug, Clone)]
pub(crate) struct GeoPoint {
    pub(crate) key: GeoHash,
    pub(crate) record: RecordId,
    pub(crate) document: Option<Document>,
    pub(crate) location: Option<Point>,
    pub(crate) distance: f64,
    pub(crate) exact: bool,
    saved_id: Option<Value>,
    dirty: bool,
    epoch: u64,
}

impl GeoPoint {
    pub(crate) fn new(entry: &IndexEntry, document: Document, distance: f64, exact: bool) -> Self {
        Self {
            key: entry.hash,
            record: entry.record,
            document: Some(document),
            location: None,
            distance,
            exact,
            saved_id: None,
            dirty: false,
            epoch: 0,
        }
    }

    pub(crate) fn at(mut self, location: Point) -> Self {
        self.location = Some(location);
        self
    }

    /// A copy resolved against one of the document's locations.
    pub(crate) fn with_exact(&self, distance: f64, location: Point) -> Self {
        let mut pt = self.clone();
        pt.distance = distance;
        pt.exact = true;
        pt.location = Some(location);
        pt
    }

    pub(crate) fn position(&self) -> IndexPosition {
        IndexPosition {
            hash: self.key.hash(),
            record: self.record,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop the cached document ahead of a yield. Returns false if the point
    /// was already dirty.
    pub(crate) fn make_dirty(&mut self, epoch: u64) -> bool {
        if self.dirty {
            return false;
        }
        if self.saved_id.is_none() {
            self.saved_id = self.document.as_ref().and_then(document_id).cloned();
        }
        self.document = None;
        self.epoch = epoch;
        self.dirty = true;
        true
    }

    /// Find the point's document again after a yield.
    ///
    /// The last known position is tried first, as long as no structural
    /// change happened in between. Otherwise every entry with the same hash
    /// is checked for the saved `_id`.
    pub(crate) fn un_dirty(&mut self, backend: &dyn IndexBackend) -> Result<Relocation> {
        debug_assert!(self.dirty);
        self.dirty = false;
        let old = self.record;

        let Some(id) = self.saved_id.clone() else {
            return Ok(Relocation::Vanished);
        };

        if backend.epoch() == self.epoch {
            if backend.entry_at(self.position())?.is_some() {
                if let Some(doc) = backend.fetch(old)? {
                    if document_id(&doc) == Some(&id) {
                        self.document = Some(doc);
                        return Ok(Relocation::Same);
                    }
                }
            }
        } else {
            log::debug!(
                "index epoch changed from {} to {}, re-scanning for {}",
                self.epoch,
                backend.epoch(),
                id
            );
        }

        let candidates = backend.entries_with_hash(self.key.hash())?;
        for entry in &candidates {
            let Some(doc) = backend.fetch(entry.record)? else {
                continue;
            };
            if document_id(&doc) == Some(&id) {
                self.record = entry.record;
                self.document = Some(doc);
                return Ok(if entry.record == old {
                    Relocation::Same
                } else {
                    Relocation::Moved { from: old }
                });
            }
            log::trace!("key {} holds {:?}, looking for {}", self.key, document_id(&doc), id);
        }

        if candidates.is_empty() {
            log::debug!("no key found for {}", self.key);
        }
        Ok(Relocation::Vanished)
    }

    /// The public view of this point, if its document is loaded.
    pub(crate) fn to_match(&self, with_distance: bool) -> Option<GeoMatch> {
        Some(GeoMatch {
            record: self.record,
            document: self.document.clone()?,
            distance: with_distance.then_some(self.distance),
            exact: self.exact,
            location: self.location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Geo2dIndex;
    use crate::storage::{KeyRange, MemoryCollection};
    use crate::types::Direction;
    use serde_json::json;
    use std::sync::Arc;

    fn collection() -> MemoryCollection {
        let index = Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap();
        MemoryCollection::new(Arc::new(index))
    }

    fn point_for(coll: &MemoryCollection, record: RecordId) -> GeoPoint {
        let mut after = None;
        while let Some(entry) = coll.seek(&KeyRange::all(), Direction::Forward, after).unwrap() {
            if entry.record == record {
                let doc = coll.fetch(record).unwrap().unwrap();
                return GeoPoint::new(&entry, doc, 0.0, false);
            }
            after = Some(entry.position());
        }
        panic!("record {} not indexed", record);
    }

    #[test]
    fn test_make_dirty_once() {
        let coll = collection();
        let r = coll.insert(json!({"_id": 1, "loc": [1, 1]})).unwrap();
        let mut p = point_for(&coll, r);
        assert!(p.make_dirty(coll.epoch()));
        assert!(!p.make_dirty(coll.epoch()));
        assert!(p.document.is_none());
        assert!(p.to_match(false).is_none());
    }

    #[test]
    fn test_undirty_same_place_sees_update() {
        let coll = collection();
        let r = coll.insert(json!({"_id": 1, "loc": [1, 1], "v": 1})).unwrap();
        let mut p = point_for(&coll, r);
        p.make_dirty(coll.epoch());
        coll.update(r, json!({"_id": 1, "loc": [1, 1], "v": 2})).unwrap();

        assert_eq!(p.un_dirty(&coll).unwrap(), Relocation::Same);
        assert_eq!(p.document.as_ref().unwrap()["v"], 2);
    }

    #[test]
    fn test_undirty_after_relocation() {
        let coll = collection();
        let r = coll.insert(json!({"_id": "a", "loc": [1, 1]})).unwrap();
        let mut p = point_for(&coll, r);
        p.make_dirty(coll.epoch());
        let moved = coll.relocate(r).unwrap();

        assert_eq!(p.un_dirty(&coll).unwrap(), Relocation::Moved { from: r });
        assert_eq!(p.record, moved);
        assert!(!p.is_dirty());
    }

    #[test]
    fn test_undirty_after_delete() {
        let coll = collection();
        let r = coll.insert(json!({"_id": 1, "loc": [1, 1]})).unwrap();
        let mut p = point_for(&coll, r);
        p.make_dirty(coll.epoch());
        coll.remove(r).unwrap();

        assert_eq!(p.un_dirty(&coll).unwrap(), Relocation::Vanished);
        assert!(p.document.is_none());
    }

    #[test]
    fn test_with_exact() {
        let coll = collection();
        let r = coll.insert(json!({"_id": 1, "loc": [3, 4]})).unwrap();
        let p = point_for(&coll, r);
        let e = p.with_exact(5.0, Point::new(3.0, 4.0));
        assert!(e.exact);
        assert_eq!(e.location, Some(Point::new(3.0, 4.0)));
        let m = e.to_match(true).unwrap();
        assert_eq!(m.distance, Some(5.0));
    }
}
