//! The expanding-region search.
//!
//! A search starts at the cell of its start hash and scans outward through
//! the ordered index in both directions, widening the cell one level at a
//! time until it covers the region of interest. It then visits the eight
//! neighbors of that cell. Neighbors that barely overlap the region are
//! split into fringe cells and only the overlapping parts are scanned.
//!
//! All of this happens in bounded chunks: [`ExpandState::fill_stack`] returns
//! as soon as its budget of examined keys or added points is spent, and the
//! next call picks up where the last one stopped.

use super::cursor::BtreeLocation;
use super::SearchContext;
use crate::error::Result;
use crate::hash::GeoHash;
use crate::shapes::GeoBox;
use crate::storage::IndexEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchState {
    Start,
    DoingExpand,
    DoneNeighbor,
    Done,
}

/// The shape-specific half of a search: geometry hooks plus a sink for keys.
pub(crate) trait SearchDriver {
    /// The hash the first expansion starts from.
    fn expand_start_hash(&self) -> GeoHash;

    /// Whether a cell of edge `width` is big enough to cover the search area.
    fn fits_in_box(&self, width: f64) -> bool;

    /// Fraction of `cell` overlapping the search area.
    fn intersects_box(&self, cell: &GeoBox) -> f64;

    /// Consider one index entry.
    fn add(&mut self, ctx: &SearchContext, entry: &IndexEntry) -> Result<()>;

    /// Points currently held by the driver.
    fn found(&self) -> i64;
}

#[derive(Debug, Clone)]
pub(crate) struct ExpandState {
    pub(crate) state: SearchState,
    /// Index into the 3x3 neighbor grid, -1 while the center is expanding.
    neighbor: i32,
    /// Keys examined so far.
    pub(crate) found_in_exp: i64,
    pub(crate) prefix: GeoHash,
    last_prefix: Option<GeoHash>,
    center_prefix: GeoHash,
    center_box: GeoBox,
    /// Pending suffixes below the current neighbor, processed from the back.
    fringe: Vec<GeoHash>,
    min: BtreeLocation,
    max: BtreeLocation,
    exp_prefix: Option<GeoHash>,
    exp_prefixes: Vec<GeoHash>,
}

impl Default for ExpandState {
    fn default() -> Self {
        Self {
            state: SearchState::Start,
            neighbor: -1,
            found_in_exp: 0,
            prefix: GeoHash::new(),
            last_prefix: None,
            center_prefix: GeoHash::new(),
            center_box: GeoBox::default(),
            fringe: Vec::new(),
            min: BtreeLocation::default(),
            max: BtreeLocation::default(),
            exp_prefix: None,
            exp_prefixes: Vec::new(),
        }
    }
}

impl ExpandState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn more_to_do(&self) -> bool {
        self.state != SearchState::Done
    }

    /// Run the search until `max_to_check` more keys have been examined,
    /// `max_to_add` more points have been added, or the search is done.
    ///
    /// With `only_expand` the neighbor phase is not entered.
    pub(crate) fn fill_stack<D: SearchDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        ctx: &SearchContext,
        max_to_check: i64,
        max_to_add: Option<i64>,
        only_expand: bool,
    ) -> Result<()> {
        ctx.interrupt.check()?;

        let max_to_add = max_to_add.filter(|n| *n >= 0).unwrap_or(max_to_check);
        let max_found = self.found_in_exp + max_to_check;
        let max_added = driver.found() + max_to_add;
        debug_assert!(max_to_check > 0);

        let converter = ctx.index.converter();
        let mut is_neighbor = self.center_prefix.constrains();

        if self.state == SearchState::Start {
            if !is_neighbor {
                self.prefix = driver.expand_start_hash();
            }

            if BtreeLocation::initial(ctx, &self.prefix, &mut self.min, &mut self.max)? {
                self.state = SearchState::DoingExpand;
                self.last_prefix = None;
            } else if is_neighbor {
                // Nothing left to scan here; move on to the next cell.
                self.state = SearchState::DoneNeighbor;
                self.fringe.pop();
                if self.fringe.is_empty() {
                    self.neighbor += 1;
                }
            } else {
                log::debug!("index is empty, nothing to expand");
                self.state = SearchState::Done;
            }
        }

        if self.state == SearchState::DoingExpand {
            loop {
                self.exp_prefix = Some(self.prefix);

                while self.found_in_exp < max_found
                    && driver.found() < max_added
                    && self
                        .min
                        .check_and_advance(&self.prefix, &mut self.found_in_exp, driver, ctx)?
                {}
                while self.found_in_exp < max_found
                    && driver.found() < max_added
                    && self
                        .max
                        .check_and_advance(&self.prefix, &mut self.found_in_exp, driver, ctx)?
                {}

                if self.found_in_exp >= max_found || driver.found() >= max_added {
                    return Ok(());
                }

                self.last_prefix = Some(self.prefix);

                if !self.prefix.constrains() {
                    log::debug!("whole index scanned after {} keys", self.found_in_exp);
                    self.state = SearchState::Done;
                    self.note_prefix();
                    return Ok(());
                }

                if !driver.fits_in_box(converter.size_edge(self.prefix.bits()))
                    && self.fringe.is_empty()
                {
                    self.prefix = self.prefix.up();
                    continue;
                }

                self.state = SearchState::DoneNeighbor;
                self.fringe.pop();
                if self.fringe.is_empty() {
                    self.neighbor += 1;
                }
                break;
            }

            self.note_prefix();
        }

        if only_expand {
            return Ok(());
        }

        if self.state == SearchState::DoneNeighbor {
            while self.neighbor < 9 {
                if self.fringe.is_empty() {
                    self.fringe.push(GeoHash::new());
                }

                if !is_neighbor {
                    self.center_prefix = self.prefix;
                    self.center_box = converter.make_box(&self.center_prefix);
                    is_neighbor = true;
                    log::debug!(
                        "center cell {} expanded, visiting neighbors of {}",
                        self.center_prefix,
                        self.center_box
                    );
                }

                let i = self.neighbor / 3 - 1;
                let j = self.neighbor % 3 - 1;

                // Skip the center itself and anything across the domain edge.
                if (i == 0 && j == 0)
                    || (i < 0 && self.center_prefix.at_min_x())
                    || (i > 0 && self.center_prefix.at_max_x())
                    || (j < 0 && self.center_prefix.at_min_y())
                    || (j > 0 && self.center_prefix.at_max_y())
                {
                    self.fringe.clear();
                    self.neighbor += 1;
                    continue;
                }

                let mut neighbor_prefix = self.center_prefix;
                neighbor_prefix.move_by(i, j);
                log::trace!(
                    "neighbor {} ({}, {}) of {} is {}, fringe {}",
                    self.neighbor,
                    i,
                    j,
                    self.center_prefix,
                    neighbor_prefix,
                    self.fringe.len()
                );

                while let Some(suffix) = self.fringe.last().copied() {
                    self.prefix = neighbor_prefix.concat(&suffix);
                    let cell = converter.make_box(&self.prefix);
                    let overlap = driver.intersects_box(&cell);

                    if overlap <= 0.0 {
                        self.fringe.pop();
                        continue;
                    }

                    if overlap < 0.5
                        && self.prefix.bits() < converter.bits()
                        && suffix.bits() < ctx.config.max_fringe_depth
                    {
                        log::trace!("refining {} (overlap {:.3})", self.prefix, overlap);
                        self.fringe.pop();
                        let [c00, c01, c10, c11] = suffix.subdivide();
                        self.fringe.extend([c00, c01, c11, c10]);
                        continue;
                    }

                    // Scan this cell as its own expansion.
                    self.state = SearchState::Start;
                    return self.fill_stack(
                        driver,
                        ctx,
                        max_found - self.found_in_exp,
                        Some(max_added - driver.found()),
                        false,
                    );
                }

                self.neighbor += 1;
            }

            log::debug!("neighbors done after {} keys", self.found_in_exp);
            self.state = SearchState::Done;
        }

        Ok(())
    }

    /// Go back to expanding the center cell and revisit its neighbors,
    /// used once the search area has been resized.
    pub(crate) fn reset_neighbors(&mut self) {
        if self.state == SearchState::DoneNeighbor {
            self.state = SearchState::DoingExpand;
            self.neighbor = -1;
        }
    }

    fn note_prefix(&mut self) {
        self.exp_prefixes.push(self.prefix);
    }

    /// Cells that were fully scanned, plus the one being scanned now.
    pub(crate) fn index_bounds(&self, ctx: &SearchContext) -> Vec<GeoBox> {
        let mut prefixes = self.exp_prefixes.clone();
        if let (Some(last), Some(current)) = (prefixes.last().copied(), self.exp_prefix) {
            if last != current {
                prefixes.push(current);
            }
        }
        prefixes
            .iter()
            .map(|p| ctx.index.converter().make_box(p))
            .collect()
    }

    pub(crate) fn save(&mut self) {
        self.min.save();
        self.max.save();
        log::debug!("saved scan positions: min {}, max {}", self.min.describe(), self.max.describe());
    }

    pub(crate) fn restore(&mut self, ctx: &SearchContext) -> Result<()> {
        self.min.restore(ctx)?;
        self.max.restore(ctx)?;
        log::debug!(
            "restored scan positions: min {}, max {}",
            self.min.describe(),
            self.max.describe()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Geo2dIndex;
    use crate::shapes::Point;
    use crate::storage::MemoryCollection;
    use rustc_hash::FxHashSet;
    use serde_json::json;
    use std::sync::Arc;

    /// Collects every key it sees inside a fixed box.
    struct Collect {
        start: GeoHash,
        region: GeoBox,
        reach: f64,
        seen: Vec<IndexEntry>,
    }

    impl SearchDriver for Collect {
        fn expand_start_hash(&self) -> GeoHash {
            self.start
        }

        fn fits_in_box(&self, width: f64) -> bool {
            width >= self.reach
        }

        fn intersects_box(&self, cell: &GeoBox) -> f64 {
            cell.intersects(&self.region)
        }

        fn add(&mut self, _ctx: &SearchContext, entry: &IndexEntry) -> Result<()> {
            self.seen.push(entry.clone());
            Ok(())
        }

        fn found(&self) -> i64 {
            self.seen.len() as i64
        }
    }

    fn setup(points: &[(f64, f64)]) -> (SearchContext, Arc<MemoryCollection>) {
        let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
        let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
        for (n, (x, y)) in points.iter().enumerate() {
            coll.insert(json!({"_id": n, "loc": [x, y]})).unwrap();
        }
        (SearchContext::new(coll.clone(), index), coll)
    }

    fn driver(ctx: &SearchContext, center: Point, half: f64) -> Collect {
        Collect {
            start: ctx.index.converter().hash_point(&center).unwrap(),
            region: GeoBox::from_corners(
                Point::new(center.x - half, center.y - half),
                Point::new(center.x + half, center.y + half),
            ),
            reach: half,
            seen: Vec::new(),
        }
    }

    #[test]
    fn test_empty_index_is_done_immediately() {
        let (ctx, _) = setup(&[]);
        let mut d = driver(&ctx, Point::new(0.0, 0.0), 1.0);
        let mut state = ExpandState::new();
        state.fill_stack(&mut d, &ctx, 50, None, false).unwrap();
        assert_eq!(state.state, SearchState::Done);
        assert!(!state.more_to_do());
    }

    #[test]
    fn test_finds_all_points_in_region() {
        let pts: Vec<(f64, f64)> = (0..10)
            .flat_map(|x| (0..10).map(move |y| (x as f64, y as f64)))
            .collect();
        let (ctx, _) = setup(&pts);
        let mut d = driver(&ctx, Point::new(4.5, 4.5), 2.0);
        let mut state = ExpandState::new();
        while state.more_to_do() {
            state.fill_stack(&mut d, &ctx, 7, None, false).unwrap();
        }

        let converter = ctx.index.converter();
        let seen: FxHashSet<_> = d.seen.iter().map(|e| e.record).collect();
        assert_eq!(seen.len(), d.seen.len(), "no key is visited twice");

        // Every point inside the region must have been visited.
        let inside = pts
            .iter()
            .filter(|(x, y)| d.region.inside(&Point::new(*x, *y), 0.0))
            .count();
        let visited_inside = d
            .seen
            .iter()
            .filter(|e| d.region.inside(&converter.unhash_to_point(&e.hash), converter.error()))
            .count();
        assert_eq!(inside, 16);
        assert!(visited_inside >= inside);
    }

    #[test]
    fn test_budget_is_respected() {
        let pts: Vec<(f64, f64)> = (0..40).map(|i| (i as f64 * 0.01, 0.0)).collect();
        let (ctx, _) = setup(&pts);
        let mut d = driver(&ctx, Point::new(0.2, 0.0), 0.5);
        let mut state = ExpandState::new();
        state.fill_stack(&mut d, &ctx, 5, None, false).unwrap();
        assert_eq!(state.found_in_exp, 5);
        assert!(state.more_to_do());

        let mut calls = 1;
        while state.more_to_do() {
            state.fill_stack(&mut d, &ctx, 5, None, false).unwrap();
            calls += 1;
        }
        assert_eq!(d.seen.len(), 40);
        assert!(calls >= 8);
    }

    #[test]
    fn test_only_expand_stops_before_neighbors() {
        let (ctx, _) = setup(&[(1.0, 1.0), (2.0, 2.0)]);
        let mut d = driver(&ctx, Point::new(1.0, 1.0), 0.5);
        let mut state = ExpandState::new();
        state.fill_stack(&mut d, &ctx, 50, None, true).unwrap();
        assert_eq!(state.state, SearchState::DoneNeighbor);
        assert!(!state.index_bounds(&ctx).is_empty());

        state.reset_neighbors();
        assert_eq!(state.state, SearchState::DoingExpand);
        while state.more_to_do() {
            state.fill_stack(&mut d, &ctx, 50, None, false).unwrap();
        }
    }

    #[test]
    fn test_interrupt_stops_search() {
        let (ctx, _) = setup(&[(1.0, 1.0)]);
        ctx.interrupt.trigger();
        let mut d = driver(&ctx, Point::new(1.0, 1.0), 0.5);
        let mut state = ExpandState::new();
        let err = state.fill_stack(&mut d, &ctx, 50, None, false).unwrap_err();
        assert!(matches!(err, crate::error::GeoError::Interrupted));
        assert!(d.seen.is_empty());
    }
}
