//! Ordered candidate set for k-nearest searches.

use super::point::GeoPoint;
use crate::types::RecordId;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Sort key of a held point: nearest first, approximate before exact on ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct HolderKey {
    pub(crate) distance: OrderedFloat<f64>,
    pub(crate) exact: bool,
    pub(crate) record: RecordId,
    seq: u64,
}

impl HolderKey {
    /// Order of two points ignoring insertion sequence.
    pub(crate) fn rank(&self) -> (OrderedFloat<f64>, bool, RecordId) {
        (self.distance, self.exact, self.record)
    }
}

pub(crate) fn rank_of(pt: &GeoPoint) -> (OrderedFloat<f64>, bool, RecordId) {
    (OrderedFloat(pt.distance), pt.exact, pt.record)
}

/// Points ordered by distance, holding a few more than `max` while
/// distances are still approximate.
#[derive(Debug)]
pub(crate) struct NearestHolder {
    points: BTreeMap<HolderKey, GeoPoint>,
    /// Per-record entry, maintained for unique document searches.
    seen: FxHashMap<RecordId, HolderKey>,
    max: usize,
    dist_error: f64,
    farthest: f64,
    unique_docs: bool,
    seq: u64,
}

impl NearestHolder {
    pub(crate) fn new(max: usize, dist_error: f64, unique_docs: bool) -> Self {
        Self {
            points: BTreeMap::new(),
            seen: FxHashMap::default(),
            max,
            dist_error,
            farthest: 0.0,
            unique_docs,
            seq: 0,
        }
    }

    /// An empty holder with the same limits.
    pub(crate) fn empty_like(&self) -> Self {
        Self::new(self.max, self.dist_error, self.unique_docs)
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }

    pub(crate) fn len(&self) -> usize {
        self.points.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distance of the worst admitted point plus twice the distance error.
    pub(crate) fn farthest(&self) -> f64 {
        self.farthest
    }

    pub(crate) fn dist_error(&self) -> f64 {
        self.dist_error
    }

    /// Add a point at its approximate distance. Returns the change in size.
    ///
    /// For unique documents an existing point for the same record that
    /// already ranks ahead wins; otherwise it is replaced.
    pub(crate) fn add_approx(&mut self, pt: GeoPoint) -> i64 {
        let prev = self.points.len() as i64;

        if self.unique_docs {
            if let Some(old) = self.seen.get(&pt.record).copied() {
                if old.rank() < rank_of(&pt) {
                    log::trace!("old point for {} is closer than {}", pt.record, pt.distance);
                    return 0;
                }
                self.points.remove(&old);
            }
        }

        let record = pt.record;
        let key = self.insert_raw(pt);
        if self.unique_docs {
            self.seen.insert(record, key);
        }

        if let Some(last) = self.points.keys().next_back() {
            self.farthest = last.distance.0 + 2.0 * self.dist_error;
        }

        self.points.len() as i64 - prev
    }

    /// Insert without any uniqueness bookkeeping.
    pub(crate) fn insert_raw(&mut self, pt: GeoPoint) -> HolderKey {
        self.seq += 1;
        let key = HolderKey {
            distance: OrderedFloat(pt.distance),
            exact: pt.exact,
            record: pt.record,
            seq: self.seq,
        };
        self.points.insert(key, pt);
        key
    }

    /// Drop points past `max` unless they are within the error margin of
    /// the last point that is surely kept. Returns the change in size.
    pub(crate) fn process_extra_points(&mut self) -> i64 {
        if self.points.is_empty() || self.max == 0 {
            return 0;
        }
        let prev = self.points.len();

        let mut to_erase = prev.saturating_sub(self.max);
        let keys: Vec<HolderKey> = self.points.keys().copied().collect();

        let mut idx = prev - to_erase - 1;
        self.farthest = keys[idx].distance.0 + 2.0 * self.dist_error;

        idx += 1;
        while to_erase > 0 && keys[idx].distance.0 <= self.farthest {
            to_erase -= 1;
            idx += 1;
        }

        log::trace!(
            "holder has {} points, max {}, keeping {} within {}",
            prev,
            self.max,
            idx,
            self.farthest
        );
        self.truncate_from_index(idx);

        self.points.len() as i64 - prev as i64
    }

    /// Remove every point from position `idx` on.
    pub(crate) fn truncate_from_index(&mut self, idx: usize) {
        let Some(cut) = self.points.keys().nth(idx).copied() else {
            return;
        };
        let tail = self.points.split_off(&cut);
        if self.unique_docs {
            for key in tail.keys() {
                self.seen.remove(&key.record);
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &HolderKey) -> Option<GeoPoint> {
        let pt = self.points.remove(key)?;
        if self.seen.get(&key.record) == Some(key) {
            self.seen.remove(&key.record);
        }
        Some(pt)
    }

    pub(crate) fn get(&self, key: &HolderKey) -> Option<&GeoPoint> {
        self.points.get(key)
    }

    pub(crate) fn first_key(&self) -> Option<HolderKey> {
        self.points.keys().next().copied()
    }

    pub(crate) fn last_key(&self) -> Option<HolderKey> {
        self.points.keys().next_back().copied()
    }

    pub(crate) fn next_key_after(&self, key: &HolderKey) -> Option<HolderKey> {
        self.points
            .range((Bound::Excluded(*key), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    pub(crate) fn prev_key_before(&self, key: &HolderKey) -> Option<HolderKey> {
        self.points
            .range((Bound::Unbounded, Bound::Excluded(*key)))
            .next_back()
            .map(|(k, _)| *k)
    }

    /// Position of `key` in distance order.
    pub(crate) fn index_of(&self, key: &HolderKey) -> usize {
        self.points.range(..*key).count()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &GeoPoint> {
        self.points.values()
    }

    pub(crate) fn into_points(self) -> impl Iterator<Item = GeoPoint> {
        self.points.into_values()
    }
}
