//! Storage abstraction consumed by the geo engine.
//!
//! The engine never owns data. It scans an ordered index of
//! `(hash, record)` entries and fetches documents by [`RecordId`] through the
//! [`IndexBackend`] trait. [`MemoryCollection`] is the in-memory
//! implementation used by tests, benchmarks and embedders.

use crate::error::{GeoError, Result};
use crate::hash::GeoHash;
use crate::index::Geo2dIndex;
use crate::types::{document_id, Direction, Document, RecordId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Where an entry sits in the ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndexPosition {
    pub hash: u64,
    pub record: RecordId,
}

/// One index entry as returned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub hash: GeoHash,
    pub record: RecordId,
    /// Values of the compound index fields, in key pattern order.
    pub other: Vec<Value>,
}

impl IndexEntry {
    pub fn position(&self) -> IndexPosition {
        IndexPosition {
            hash: self.hash.hash(),
            record: self.record,
        }
    }
}

/// An inclusive-or-exclusive range of raw hash values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub low: Bound<u64>,
    pub high: Bound<u64>,
}

impl KeyRange {
    /// Every key `<= hash`.
    pub fn at_most(hash: u64) -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Included(hash),
        }
    }

    /// Every key `> hash`.
    pub fn above(hash: u64) -> Self {
        Self {
            low: Bound::Excluded(hash),
            high: Bound::Unbounded,
        }
    }

    pub fn exact(hash: u64) -> Self {
        Self {
            low: Bound::Included(hash),
            high: Bound::Included(hash),
        }
    }

    pub fn all() -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Unbounded,
        }
    }

    pub fn contains(&self, hash: u64) -> bool {
        let above_low = match self.low {
            Bound::Included(l) => hash >= l,
            Bound::Excluded(l) => hash > l,
            Bound::Unbounded => true,
        };
        let below_high = match self.high {
            Bound::Included(h) => hash <= h,
            Bound::Excluded(h) => hash < h,
            Bound::Unbounded => true,
        };
        above_low && below_high
    }

    /// First and last index positions the range can hold, or `None` if it is empty.
    pub fn positions(&self) -> Option<(IndexPosition, IndexPosition)> {
        let low = match self.low {
            Bound::Included(l) => l,
            Bound::Excluded(l) => l.checked_add(1)?,
            Bound::Unbounded => 0,
        };
        let high = match self.high {
            Bound::Included(h) => h,
            Bound::Excluded(h) => h.checked_sub(1)?,
            Bound::Unbounded => u64::MAX,
        };
        if low > high {
            return None;
        }
        Some((
            IndexPosition {
                hash: low,
                record: RecordId(0),
            },
            IndexPosition {
                hash: high,
                record: RecordId(u64::MAX),
            },
        ))
    }
}

/// Ordered index scan and record fetch, the narrow interface the engine needs.
///
/// Positions are values, not pointers: after concurrent writes a saved
/// [`IndexPosition`] either still names the same entry or names nothing.
pub trait IndexBackend: Send + Sync {
    /// The first entry in `range` strictly after `after` in scan `direction`.
    fn seek(
        &self,
        range: &KeyRange,
        direction: Direction,
        after: Option<IndexPosition>,
    ) -> Result<Option<IndexEntry>>;

    /// The entry at exactly `position`, if it still exists.
    fn entry_at(&self, position: IndexPosition) -> Result<Option<IndexEntry>>;

    /// Every entry with the given raw hash, in record order.
    fn entries_with_hash(&self, hash: u64) -> Result<Vec<IndexEntry>>;

    fn fetch(&self, record: RecordId) -> Result<Option<Document>>;

    /// Generation counter, bumped by every change that invalidates positions.
    fn epoch(&self) -> u64;

    fn is_empty(&self) -> Result<bool>;

    fn stats(&self) -> Result<StorageStats>;
}

/// Collection statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    /// Number of stored documents
    pub document_count: usize,
    /// Number of index entries
    pub entry_count: usize,
    /// Number of write operations performed
    pub operations_count: u64,
    /// Current epoch
    pub epoch: u64,
}

/// An in-memory document collection with a single 2d index.
///
/// # Examples
///
/// ```rust
/// use geo2d::{Geo2dIndex, IndexBackend, MemoryCollection};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
/// let coll = MemoryCollection::new(index);
/// let id = coll.insert(json!({"_id": 1, "loc": [0, 0]})).unwrap();
/// assert_eq!(coll.len(), 1);
/// assert!(coll.fetch(id).unwrap().is_some());
/// ```
pub struct MemoryCollection {
    index: Arc<Geo2dIndex>,
    inner: RwLock<CollectionInner>,
}

#[derive(Default)]
struct CollectionInner {
    documents: FxHashMap<RecordId, Document>,
    entries: BTreeMap<IndexPosition, Vec<Value>>,
    next_record: u64,
    epoch: u64,
    operations: u64,
}

impl MemoryCollection {
    pub fn new(index: Arc<Geo2dIndex>) -> Self {
        Self {
            index,
            inner: RwLock::new(CollectionInner {
                next_record: 1,
                ..Default::default()
            }),
        }
    }

    pub fn index(&self) -> &Arc<Geo2dIndex> {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.inner.read().documents.len()
    }

    /// Store a document and index its locations. The document must carry `_id`.
    pub fn insert(&self, doc: Document) -> Result<RecordId> {
        require_id(&doc)?;
        let keys = self.index.keys(&doc)?;

        let mut inner = self.inner.write();
        let record = RecordId(inner.next_record);
        inner.next_record += 1;
        for key in keys {
            inner.entries.insert(
                IndexPosition {
                    hash: key.hash.hash(),
                    record,
                },
                key.other,
            );
        }
        inner.documents.insert(record, doc);
        inner.operations += 1;
        Ok(record)
    }

    /// Replace a document in place, keeping its record id.
    pub fn update(&self, record: RecordId, doc: Document) -> Result<()> {
        require_id(&doc)?;
        let new_keys = self.index.keys(&doc)?;

        let mut inner = self.inner.write();
        let Some(old) = inner.documents.get(&record) else {
            return Err(GeoError::Storage(format!("no document at {}", record)));
        };
        let old_keys = self.index.keys(old)?;

        for key in &old_keys {
            inner.entries.remove(&IndexPosition {
                hash: key.hash.hash(),
                record,
            });
        }
        let moved = old_keys.iter().map(|k| k.hash).ne(new_keys.iter().map(|k| k.hash));
        for key in new_keys {
            inner.entries.insert(
                IndexPosition {
                    hash: key.hash.hash(),
                    record,
                },
                key.other,
            );
        }
        inner.documents.insert(record, doc);
        inner.operations += 1;
        if moved {
            inner.epoch += 1;
        }
        Ok(())
    }

    /// Move a document to a fresh record id, as a storage engine does when a
    /// grown document no longer fits in place.
    pub fn relocate(&self, record: RecordId) -> Result<RecordId> {
        let mut inner = self.inner.write();
        let Some(doc) = inner.documents.remove(&record) else {
            return Err(GeoError::Storage(format!("no document at {}", record)));
        };

        let new_record = RecordId(inner.next_record);
        inner.next_record += 1;

        let positions: Vec<IndexPosition> = inner
            .entries
            .keys()
            .filter(|p| p.record == record)
            .copied()
            .collect();
        for pos in positions {
            if let Some(other) = inner.entries.remove(&pos) {
                inner.entries.insert(
                    IndexPosition {
                        hash: pos.hash,
                        record: new_record,
                    },
                    other,
                );
            }
        }

        inner.documents.insert(new_record, doc);
        inner.operations += 1;
        inner.epoch += 1;
        Ok(new_record)
    }

    /// Remove a document and its index entries.
    pub fn remove(&self, record: RecordId) -> Result<Option<Document>> {
        let mut inner = self.inner.write();
        let Some(doc) = inner.documents.remove(&record) else {
            return Ok(None);
        };
        inner.entries.retain(|p, _| p.record != record);
        inner.operations += 1;
        inner.epoch += 1;
        Ok(Some(doc))
    }

    /// Record id of the document with the given `_id`.
    pub fn find_by_id(&self, id: &Value) -> Option<RecordId> {
        let inner = self.inner.read();
        inner
            .documents
            .iter()
            .find(|(_, doc)| document_id(doc) == Some(id))
            .map(|(record, _)| *record)
    }
}

fn require_id(doc: &Document) -> Result<()> {
    if document_id(doc).is_none() {
        return Err(GeoError::InvalidDocument(format!(
            "document must have an _id: {}",
            doc
        )));
    }
    Ok(())
}

impl CollectionInner {
    fn entry(&self, pos: &IndexPosition, other: &[Value], bits: u32) -> IndexEntry {
        IndexEntry {
            hash: GeoHash::from_raw(pos.hash, bits),
            record: pos.record,
            other: other.to_vec(),
        }
    }
}

impl IndexBackend for MemoryCollection {
    fn seek(
        &self,
        range: &KeyRange,
        direction: Direction,
        after: Option<IndexPosition>,
    ) -> Result<Option<IndexEntry>> {
        let Some((lo, hi)) = range.positions() else {
            return Ok(None);
        };
        let bits = self.index.converter().bits();
        let inner = self.inner.read();

        let found = match direction {
            Direction::Forward => {
                let start = match after {
                    Some(a) if a >= hi => return Ok(None),
                    Some(a) if a >= lo => Bound::Excluded(a),
                    _ => Bound::Included(lo),
                };
                inner.entries.range((start, Bound::Included(hi))).next()
            }
            Direction::Backward => {
                let end = match after {
                    Some(a) if a <= lo => return Ok(None),
                    Some(a) if a <= hi => Bound::Excluded(a),
                    _ => Bound::Included(hi),
                };
                inner.entries.range((Bound::Included(lo), end)).next_back()
            }
        };

        Ok(found.map(|(pos, other)| inner.entry(pos, other, bits)))
    }

    fn entry_at(&self, position: IndexPosition) -> Result<Option<IndexEntry>> {
        let bits = self.index.converter().bits();
        let inner = self.inner.read();
        Ok(inner
            .entries
            .get(&position)
            .map(|other| inner.entry(&position, other, bits)))
    }

    fn entries_with_hash(&self, hash: u64) -> Result<Vec<IndexEntry>> {
        let Some((lo, hi)) = KeyRange::exact(hash).positions() else {
            return Ok(Vec::new());
        };
        let bits = self.index.converter().bits();
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range(lo..=hi)
            .map(|(pos, other)| inner.entry(pos, other, bits))
            .collect())
    }

    fn fetch(&self, record: RecordId) -> Result<Option<Document>> {
        Ok(self.inner.read().documents.get(&record).cloned())
    }

    fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.read().entries.is_empty())
    }

    fn stats(&self) -> Result<StorageStats> {
        let inner = self.inner.read();
        Ok(StorageStats {
            document_count: inner.documents.len(),
            entry_count: inner.entries.len(),
            operations_count: inner.operations,
            epoch: inner.epoch,
        })
    }
}
