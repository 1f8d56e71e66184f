//! Directional scans over the ordered hash index.

use super::expand::SearchDriver;
use super::SearchContext;
use crate::error::Result;
use crate::hash::GeoHash;
use crate::storage::{IndexEntry, IndexPosition, KeyRange};
use crate::types::Direction;

/// One side of an expanding scan: a cursor walking away from the start hash
/// in a single direction.
#[derive(Debug, Clone)]
pub(crate) struct BtreeLocation {
    direction: Direction,
    range: KeyRange,
    current: Option<IndexEntry>,
    saved: Option<IndexPosition>,
}

impl Default for BtreeLocation {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            range: KeyRange::all(),
            current: None,
            saved: None,
        }
    }
}

impl BtreeLocation {
    fn open(ctx: &SearchContext, range: KeyRange, direction: Direction) -> Result<Self> {
        let current = ctx.backend.seek(&range, direction, None)?;
        Ok(Self {
            direction,
            range,
            current,
            saved: None,
        })
    }

    /// Open `min` backward from `start` (inclusive) and `max` forward from it
    /// (exclusive). Returns false when neither side has anything to scan.
    pub(crate) fn initial(
        ctx: &SearchContext,
        start: &GeoHash,
        min: &mut BtreeLocation,
        max: &mut BtreeLocation,
    ) -> Result<bool> {
        *min = Self::open(ctx, KeyRange::at_most(start.hash()), Direction::Backward)?;
        *max = Self::open(ctx, KeyRange::above(start.hash()), Direction::Forward)?;
        Ok(min.ok() || max.ok())
    }

    pub(crate) fn ok(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn has_prefix(&self, prefix: &GeoHash) -> bool {
        self.current
            .as_ref()
            .is_some_and(|entry| entry.hash.has_prefix(prefix))
    }

    /// Hand the current entry to `driver` and step, if it still lies under `prefix`.
    pub(crate) fn check_and_advance<D: SearchDriver + ?Sized>(
        &mut self,
        prefix: &GeoHash,
        found_in_exp: &mut i64,
        driver: &mut D,
        ctx: &SearchContext,
    ) -> Result<bool> {
        if !self.has_prefix(prefix) {
            return Ok(false);
        }
        let Some(entry) = self.current.take() else {
            return Ok(false);
        };

        log::trace!("checking key {} ({})", entry.hash, entry.record);
        *found_in_exp += 1;
        driver.add(ctx, &entry)?;

        self.current = ctx
            .backend
            .seek(&self.range, self.direction, Some(entry.position()))?;
        Ok(true)
    }

    pub(crate) fn save(&mut self) {
        self.saved = self.current.as_ref().map(IndexEntry::position);
    }

    /// Re-establish the scan after writes. The saved entry is reloaded if it
    /// still exists; otherwise the scan resumes just past where it was.
    pub(crate) fn restore(&mut self, ctx: &SearchContext) -> Result<()> {
        let Some(pos) = self.saved.take() else {
            return Ok(());
        };
        self.current = match ctx.backend.entry_at(pos)? {
            Some(entry) => Some(entry),
            None => ctx.backend.seek(&self.range, self.direction, Some(pos))?,
        };
        Ok(())
    }

    pub(crate) fn describe(&self) -> String {
        match &self.current {
            Some(entry) => format!("{:?} at {} {}", self.direction, entry.hash, entry.record),
            None => format!("{:?} [none]", self.direction),
        }
    }
}
