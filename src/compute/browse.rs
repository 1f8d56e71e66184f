//! The resumable `$within` cursor.
//!
//! Results are produced lazily: each refill runs one budgeted chunk of the
//! expanding search and queues whatever matched. Between refills the owner
//! may yield with [`GeoBrowse::note_location`] and later resume with
//! [`GeoBrowse::check_location`]; queued points are re-validated against the
//! collection on resume.

use super::accumulator::{Accumulator, Admitted};
use super::expand::{ExpandState, SearchDriver};
use super::point::{GeoPoint, Relocation};
use super::shape::WithinShape;
use super::{ExplainStats, SearchContext};
use crate::error::Result;
use crate::filter::Filter;
use crate::hash::GeoHash;
use crate::shapes::GeoBox;
use crate::storage::IndexEntry;
use crate::types::{document_id, Document, GeoMatch};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

struct BrowseSink {
    shape: WithinShape,
    acc: Accumulator,
    stack: VecDeque<GeoPoint>,
    cur: Option<GeoPoint>,
    /// `_id`s of every document already handled, as JSON text.
    seen_ids: FxHashSet<String>,
}

impl SearchDriver for BrowseSink {
    fn expand_start_hash(&self) -> GeoHash {
        self.shape.expand_start_hash()
    }

    fn fits_in_box(&self, width: f64) -> bool {
        self.shape.fits_in_box(width)
    }

    fn intersects_box(&self, cell: &GeoBox) -> f64 {
        self.shape.intersects_box(cell)
    }

    fn add(&mut self, ctx: &SearchContext, entry: &IndexEntry) -> Result<()> {
        let shape = &self.shape;
        let converter = ctx.index.converter();
        let Some(admitted) = self
            .acc
            .admit(ctx, entry, |p| shape.approx_key_check(converter, p))?
        else {
            return Ok(());
        };

        let found = self.add_specific(ctx, entry, admitted)?;
        self.acc.found += found;
        Ok(())
    }

    fn found(&self) -> i64 {
        self.acc.found
    }
}

impl BrowseSink {
    /// Queue the matching locations of a newly admitted document. Every
    /// location is handled here, so a document is only processed once.
    fn add_specific(
        &mut self,
        ctx: &SearchContext,
        entry: &IndexEntry,
        admitted: Admitted,
    ) -> Result<i64> {
        if !admitted.new_doc || self.remembered(&admitted.document) {
            return Ok(0);
        }

        let mut found = 0;
        let unique_docs = self.acc.unique_docs;

        if unique_docs && !admitted.on_bounds {
            self.stack
                .push_front(GeoPoint::new(entry, admitted.document, 0.0, false));
            found += 1;
        } else {
            let locations =
                self.acc
                    .points_for(&ctx.index, &entry.hash, &admitted.document, true)?;
            let base = GeoPoint::new(entry, admitted.document, 0.0, false);
            for loc in locations {
                let (inside, _) = self.shape.exact_doc_check(&loc)?;
                if !inside {
                    continue;
                }
                self.stack.push_front(base.clone().at(loc));
                found += 1;
                if unique_docs {
                    break;
                }
            }
        }

        if self.cur.is_none() {
            self.cur = self.stack.pop_front();
        }
        Ok(found)
    }

    fn remembered(&mut self, doc: &Document) -> bool {
        let id = document_id(doc).map(|v| v.to_string()).unwrap_or_default();
        if self.seen_ids.contains(&id) {
            log::trace!("object {} already seen", id);
            return true;
        }
        self.seen_ids.insert(id);
        false
    }
}

/// A `$within` search over one shape, iterated lazily.
///
/// ```rust
/// use geo2d::{Geo2dIndex, GeoBrowse, MemoryCollection, SearchContext, WithinShape};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
/// let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
/// coll.insert(json!({"_id": 1, "loc": [1, 1]})).unwrap();
/// coll.insert(json!({"_id": 2, "loc": [9, 9]})).unwrap();
///
/// let shape = WithinShape::boxed(index.converter(), &json!([[0, 0], [5, 5]])).unwrap();
/// let ctx = SearchContext::new(coll, Arc::clone(&index));
/// let found: Vec<_> = GeoBrowse::new(ctx, shape, None, true)
///     .map(|r| r.unwrap().document["_id"].clone())
///     .collect();
/// assert_eq!(found, vec![json!(1)]);
/// ```
pub struct GeoBrowse {
    ctx: SearchContext,
    expand: ExpandState,
    sink: BrowseSink,
    first_call: bool,
    noted: bool,
    nscanned: u64,
    n_dirtied: u64,
    n_changed: u64,
    n_removed: u64,
    /// The current point was already handed out by the iterator.
    yielded_current: bool,
    failed: bool,
}

impl GeoBrowse {
    pub fn new(
        ctx: SearchContext,
        shape: WithinShape,
        filter: Option<Filter>,
        unique_docs: bool,
    ) -> Self {
        log::debug!("starting {} browse", shape.name());
        Self {
            ctx,
            expand: ExpandState::new(),
            sink: BrowseSink {
                shape,
                acc: Accumulator::new(filter, unique_docs, false),
                stack: VecDeque::new(),
                cur: None,
                seen_ids: FxHashSet::default(),
            },
            first_call: true,
            noted: false,
            nscanned: 0,
            n_dirtied: 0,
            n_changed: 0,
            n_removed: 0,
            yielded_current: false,
            failed: false,
        }
    }

    pub fn shape(&self) -> &WithinShape {
        &self.sink.shape
    }

    /// Points queued or current that have not been discarded.
    pub fn found(&self) -> i64 {
        self.sink.acc.found
    }

    pub fn more_to_do(&self) -> bool {
        self.expand.more_to_do()
    }

    fn fill(&mut self) -> Result<()> {
        let budget = self.ctx.budget();
        self.expand
            .fill_stack(&mut self.sink, &self.ctx, budget, None, false)
    }

    /// Whether a current point is available, searching further if needed.
    pub fn ok(&mut self) -> Result<bool> {
        if self.noted {
            self.check_location()?;
        }

        let first = self.first_call;
        if first {
            self.fill()?;
            self.first_call = false;
        }
        if self.sink.cur.is_some() || !self.sink.stack.is_empty() {
            if first {
                self.nscanned += 1;
            }
            return Ok(true);
        }

        while self.more_to_do() {
            log::trace!("refilling stack");
            self.fill()?;
            if self.sink.cur.is_some() {
                if first {
                    self.nscanned += 1;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Move to the next point. Returns false once the search is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        if self.noted {
            self.check_location()?;
        }
        self.advance_inner()
    }

    fn advance_inner(&mut self) -> Result<bool> {
        self.sink.cur = None;

        if let Some(next) = self.sink.stack.pop_front() {
            self.sink.cur = Some(next);
            self.nscanned += 1;
            return Ok(true);
        }

        while self.sink.cur.is_none() && self.more_to_do() {
            self.fill()?;
        }
        if self.sink.cur.is_some() {
            self.nscanned += 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// The current point, if it is loaded.
    pub fn current(&self) -> Option<GeoMatch> {
        self.sink.cur.as_ref().and_then(|pt| pt.to_match(false))
    }

    /// Prepare for the collection to change: remember scan positions and
    /// drop every cached document.
    pub fn note_location(&mut self) {
        self.noted = true;
        self.expand.save();

        let epoch = self.ctx.backend.epoch();
        for pt in self.sink.stack.iter_mut() {
            if pt.make_dirty(epoch) {
                self.n_dirtied += 1;
            }
        }
        if let Some(cur) = self.sink.cur.as_mut() {
            if cur.make_dirty(epoch) {
                self.n_dirtied += 1;
            }
        }

        log::debug!(
            "noted location with {} queued points, {} dirtied so far",
            self.sink.stack.len(),
            self.n_dirtied
        );
        self.sink.acc.clear_matches();
    }

    /// Resume after [`GeoBrowse::note_location`]. Queued points whose
    /// documents were deleted are dropped; if the current one was deleted
    /// the cursor moves on to the next point.
    pub fn check_location(&mut self) -> Result<()> {
        if !self.noted {
            return Ok(());
        }
        self.expand.restore(&self.ctx)?;

        let backend = &*self.ctx.backend;
        let mut kept = VecDeque::with_capacity(self.sink.stack.len());
        while let Some(mut pt) = self.sink.stack.pop_front() {
            match pt.un_dirty(backend)? {
                Relocation::Same => kept.push_back(pt),
                Relocation::Moved { from } => {
                    log::debug!("queued point moved from {} to {}", from, pt.record);
                    self.n_changed += 1;
                    self.sink.acc.fix_matches(from, pt.record);
                    kept.push_back(pt);
                }
                Relocation::Vanished => {
                    log::debug!("removing queued point {}", pt.record);
                    self.n_removed += 1;
                    self.sink.acc.found -= 1;
                }
            }
        }
        self.sink.stack = kept;
        self.noted = false;

        let Some(cur) = self.sink.cur.as_mut() else {
            return Ok(());
        };
        if !cur.is_dirty() {
            return Ok(());
        }
        match cur.un_dirty(backend)? {
            Relocation::Same => {}
            Relocation::Moved { from } => {
                log::debug!("current point moved from {} to {}", from, cur.record);
                self.n_changed += 1;
                let to = cur.record;
                self.sink.acc.fix_matches(from, to);
            }
            Relocation::Vanished => {
                log::debug!("current point {} vanished, advancing", cur.record);
                self.n_removed += 1;
                self.sink.acc.found -= 1;
                self.advance_inner()?;
                self.yielded_current = false;
            }
        }
        Ok(())
    }

    pub fn explain(&self) -> ExplainStats {
        let acc = &self.sink.acc;
        ExplainStats {
            looked_at: acc.looked_at,
            matches_performed: acc.matches_performed,
            objects_loaded: acc.objects_loaded,
            points_loaded: acc.points_loaded,
            points_saved_for_yield: self.n_dirtied,
            points_changed_on_yield: self.n_changed,
            points_removed_on_yield: self.n_removed,
            nscanned: self.nscanned,
        }
    }

    /// Boxes of every cell fully expanded so far.
    pub fn index_bounds(&self) -> Vec<GeoBox> {
        self.expand.index_bounds(&self.ctx)
    }

    fn step(&mut self) -> Result<Option<GeoMatch>> {
        if self.noted {
            self.check_location()?;
        }

        let live = if self.first_call {
            self.ok()?
        } else if self.yielded_current {
            self.advance_inner()?
        } else {
            self.sink.cur.is_some()
        };
        if !live {
            return Ok(None);
        }

        self.yielded_current = true;
        Ok(self.current())
    }
}

impl Iterator for GeoBrowse {
    type Item = Result<GeoMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(m) => m.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
