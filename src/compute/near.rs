//! k-nearest (`$near`) search.
//!
//! The search runs in two phases. The first expands around the query point
//! until enough candidates are held or the expanded cell outgrows the scan
//! distance. The second sizes a box that surely contains the k nearest points
//! and scans it completely, neighbors included. Candidates are held at their
//! approximate (key) distance throughout; only the ones whose order could
//! change are resolved against their documents at the end.

use super::accumulator::Accumulator;
use super::expand::{ExpandState, SearchDriver, SearchState};
use super::holder::{rank_of, NearestHolder};
use super::point::GeoPoint;
use super::shape::{DistanceKind, KeyResult};
use super::{ExplainStats, SearchContext};
use crate::error::Result;
use crate::filter::Filter;
use crate::hash::GeoHash;
use crate::index::Geo2dIndex;
use crate::shapes::{
    check_earth_bounds, compute_x_scan_distance, distance_within, rad2deg, spheredist_deg, GeoBox,
    Point,
};
use crate::storage::IndexEntry;
use crate::types::GeoMatch;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct Metric {
    near: Point,
    max_distance: f64,
    kind: DistanceKind,
}

impl Metric {
    fn distance(&self, p: &Point) -> Result<f64> {
        match self.kind {
            DistanceKind::Plain => Ok(self.near.distance(p)),
            DistanceKind::Sphere => {
                check_earth_bounds(p)?;
                Ok(spheredist_deg(&self.near, p))
            }
        }
    }

    /// Classify a key against the current admission border: the max
    /// distance while the holder has room, its farthest point once full.
    fn approx_check(&self, p: &Point, holder: &NearestHolder) -> Result<(KeyResult, f64)> {
        let d = self.distance(p)?;
        let border = if holder.len() < holder.max() {
            self.max_distance
        } else {
            holder.farthest()
        };
        let err = 2.0 * holder.dist_error();

        let result = if d >= border - err && d <= border + err {
            KeyResult::Border
        } else if d < border {
            KeyResult::Good
        } else {
            KeyResult::Bad
        };
        Ok((result, d))
    }

    fn exact_check(&self, p: &Point) -> Result<(bool, f64)> {
        let d = self.distance(p)?;
        let within = match self.kind {
            DistanceKind::Plain => distance_within(&self.near, p, self.max_distance),
            DistanceKind::Sphere => d <= self.max_distance,
        };
        Ok((within, d))
    }
}

fn box_around(p: &Point, dist: f64) -> GeoBox {
    GeoBox::from_corners(
        Point::new(p.x - dist, p.y - dist),
        Point::new(p.x + dist, p.y + dist),
    )
}

struct NearSink {
    acc: Accumulator,
    holder: NearestHolder,
    metric: Metric,
    start: GeoHash,
    scan_distance: f64,
    want: GeoBox,
}

impl SearchDriver for NearSink {
    fn expand_start_hash(&self) -> GeoHash {
        self.start
    }

    fn fits_in_box(&self, width: f64) -> bool {
        width >= self.scan_distance
    }

    fn intersects_box(&self, cell: &GeoBox) -> f64 {
        cell.intersects(&self.want)
    }

    fn add(&mut self, ctx: &SearchContext, entry: &IndexEntry) -> Result<()> {
        let metric = &self.metric;
        let holder = &self.holder;
        let Some(admitted) = self
            .acc
            .admit(ctx, entry, |p| metric.approx_check(p, holder))?
        else {
            return Ok(());
        };

        let pt = GeoPoint::new(entry, admitted.document, admitted.key_distance, false);
        let diff = self.holder.add_approx(pt);
        self.acc.found += diff;
        Ok(())
    }

    fn found(&self) -> i64 {
        self.acc.found
    }
}

impl NearSink {
    fn process_extra_points(&mut self) {
        let diff = self.holder.process_extra_points();
        self.acc.found += diff;
    }

    fn run(&mut self, expand: &mut ExpandState, ctx: &SearchContext, num_wanted: i64) -> Result<()> {
        let budget = ctx.budget();
        let converter = ctx.index.converter();

        log::debug!(
            "start near search for {} points near {} (max distance {})",
            num_wanted,
            self.metric.near,
            self.metric.max_distance
        );

        loop {
            let wanted = num_wanted - self.found();
            expand.fill_stack(&mut *self, ctx, budget, Some(wanted), true)?;
            self.process_extra_points();

            let keep_going = expand.state != SearchState::Done
                && expand.state != SearchState::DoneNeighbor
                && self.found() < num_wanted
                && (!expand.prefix.constrains()
                    || converter.size_edge(expand.prefix.bits()) <= self.scan_distance);
            if !keep_going {
                break;
            }
        }

        if expand.state == SearchState::Done {
            return self.expand_end_points(ctx, true);
        }

        log::debug!(
            "near phase 1 found {} points ({} keys scanned) in {} with farthest {}",
            self.found(),
            expand.found_in_exp,
            expand.prefix,
            self.holder.farthest()
        );

        let error = converter.error();
        let far = if self.found() < num_wanted {
            self.scan_distance
        } else {
            match self.metric.kind {
                DistanceKind::Plain => self.holder.farthest() + error,
                DistanceKind::Sphere => self.scan_distance.min(
                    compute_x_scan_distance(self.metric.near.y, rad2deg(self.holder.farthest()))
                        + 2.0 * error,
                ),
            }
        };

        self.want = box_around(&self.metric.near, far);
        self.scan_distance = far;
        expand.reset_neighbors();
        log::debug!("near phase 2 scanning {} from {}", self.want, self.start);

        while expand.state != SearchState::Done {
            expand.fill_stack(&mut *self, ctx, budget, None, false)?;
            self.process_extra_points();
        }

        log::debug!("near search done with {} points", self.holder.len());
        self.expand_end_points(ctx, true)
    }

    /// Resolve approximate points that could still change the outcome and
    /// cut the holder down to `max`.
    fn expand_end_points(&mut self, ctx: &SearchContext, finish: bool) -> Result<()> {
        self.process_extra_points();

        let max = self.holder.max();
        let two_err = 2.0 * self.holder.dist_error();

        if max > 0 && self.holder.len() > max {
            let to_erase = self.holder.len() - max;
            let mut tested = self.holder.empty_like();

            // Work back from the end through every point that might not belong.
            let mut cursor = self.holder.last_key();
            let mut approx_min = cursor.map_or(0.0, |k| k.distance.0) - two_err;
            let mut erased = 0;
            while let Some(key) = cursor {
                if key.distance.0 < approx_min && erased >= to_erase {
                    break;
                }
                cursor = self.holder.prev_key_before(&key);
                if let Some(pt) = self.holder.remove(&key) {
                    add_exact_points(
                        &mut self.acc,
                        &self.metric,
                        &ctx.index,
                        &pt,
                        &mut tested,
                        true,
                    )?;
                }
                erased += 1;

                if let Some(first) = tested.first_key() {
                    approx_min = first.distance.0 - two_err;
                }
            }

            let add_back = erased.saturating_sub(to_erase);
            log::trace!(
                "{} tested, {} erased, {} added back",
                tested.len(),
                erased,
                add_back
            );
            for pt in tested.into_points().take(add_back) {
                self.holder.insert_raw(pt);
            }
        }

        let unique_docs = self.acc.unique_docs;
        let need_distance = self.acc.need_distance;

        let mut expanded = 0usize;
        let mut window_end = -1.0;
        let mut cursor = self.holder.first_key();

        while let Some(key) = cursor {
            let Some(current) = self.holder.get(&key).cloned() else {
                break;
            };

            let in_window = current.distance <= window_end;
            if !in_window && expanded >= max {
                break;
            }

            let expand_approx =
                !current.exact && (!unique_docs || (finish && need_distance) || in_window);

            if expand_approx {
                // Exact points land within 2 * error of the current one.
                let (before, _) = add_exact_points(
                    &mut self.acc,
                    &self.metric,
                    &ctx.index,
                    &current,
                    &mut self.holder,
                    false,
                )?;
                expanded += before;
                if max > 0 && expanded < max {
                    window_end = current.distance + two_err;
                }

                cursor = self.holder.next_key_after(&key);
                self.holder.remove(&key);
            } else {
                expanded += 1;
                cursor = self.holder.next_key_after(&key);
            }
        }

        let end = match cursor {
            Some(key) => self.holder.index_of(&key),
            None => self.holder.len(),
        };
        self.holder
            .truncate_from_index(end.saturating_sub(expanded.saturating_sub(max)));

        log::debug!("expanded end points, {} points held (max {})", self.holder.len(), max);
        Ok(())
    }
}

/// Insert exact points for `pt` into `dest`. Returns how many sort before
/// and after `pt`.
fn add_exact_points(
    acc: &mut Accumulator,
    metric: &Metric,
    index: &Geo2dIndex,
    pt: &GeoPoint,
    dest: &mut NearestHolder,
    force: bool,
) -> Result<(usize, usize)> {
    if pt.exact {
        if force {
            dest.insert_raw(pt.clone());
        }
        return Ok((0, 0));
    }
    let Some(doc) = pt.document.as_ref() else {
        return Ok((0, 0));
    };

    let unique_docs = acc.unique_docs;
    let locations = acc.points_for(index, &pt.key, doc, unique_docs)?;

    let mut before = 0;
    let mut after = 0;
    let mut nearest: Option<(f64, Point)> = None;

    for loc in locations {
        let (within, d) = metric.exact_check(&loc)?;
        if !within {
            continue;
        }

        if unique_docs {
            if nearest.is_none_or(|(best, _)| d < best) {
                nearest = Some((d, loc));
            }
            continue;
        }

        let exact = pt.with_exact(d, loc);
        if rank_of(&exact) < rank_of(pt) {
            before += 1;
        } else {
            after += 1;
        }
        dest.insert_raw(exact);
    }

    if let Some((d, loc)) = nearest {
        let exact = pt.with_exact(d, loc);
        if rank_of(&exact) < rank_of(pt) {
            before += 1;
        } else {
            after += 1;
        }
        dest.insert_raw(exact);
    }

    Ok((before, after))
}

/// Builder and entry point of a `$near` search.
///
/// ```rust
/// use geo2d::{Geo2dIndex, MemoryCollection, NearSearch, SearchContext};
/// use geo2d::shapes::Point;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
/// let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
/// coll.insert(json!({"_id": 1, "loc": [0, 0]})).unwrap();
/// coll.insert(json!({"_id": 2, "loc": [3, 4]})).unwrap();
///
/// let ctx = SearchContext::new(coll, index);
/// let cursor = NearSearch::new(ctx, Point::new(3.0, 3.0), 1).unwrap().exec().unwrap();
/// let results: Vec<_> = cursor.map(|r| r.unwrap()).collect();
/// assert_eq!(results[0].document["_id"], 2);
/// ```
pub struct NearSearch {
    ctx: SearchContext,
    near: Point,
    start: GeoHash,
    num_wanted: usize,
    filter: Option<Filter>,
    max_distance: f64,
    kind: DistanceKind,
    unique_docs: bool,
    need_distance: bool,
}

impl NearSearch {
    pub fn new(ctx: SearchContext, near: Point, num_wanted: usize) -> Result<Self> {
        let start = ctx.index.converter().hash_point(&near)?;
        Ok(Self {
            ctx,
            near,
            start,
            num_wanted,
            filter: None,
            max_distance: f64::MAX,
            kind: DistanceKind::Plain,
            unique_docs: false,
            need_distance: false,
        })
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    /// Negative distances scan everything.
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_kind(mut self, kind: DistanceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Return each document once, at its nearest location.
    pub fn with_unique_docs(mut self, unique_docs: bool) -> Self {
        self.unique_docs = unique_docs;
        self
    }

    /// Resolve every returned distance exactly.
    pub fn with_need_distance(mut self, need_distance: bool) -> Self {
        self.need_distance = need_distance;
        self
    }

    /// Start the expansion from `start` instead of the query point's cell.
    pub fn with_start(mut self, start: GeoHash) -> Self {
        self.start = start;
        self
    }

    /// Run the search to completion.
    pub fn exec(self) -> Result<NearCursor> {
        let ctx = self.ctx;
        let converter = ctx.index.converter();

        let dist_error = match self.kind {
            DistanceKind::Plain => converter.error(),
            DistanceKind::Sphere => converter.error_sphere(),
        };
        let scan_distance = if self.max_distance < 0.0 {
            f64::MAX
        } else {
            match self.kind {
                DistanceKind::Plain => self.max_distance + converter.error(),
                DistanceKind::Sphere => {
                    check_earth_bounds(&self.near)?;
                    compute_x_scan_distance(
                        self.near.y,
                        rad2deg(self.max_distance) + converter.error(),
                    )
                }
            }
        };

        let mut sink = NearSink {
            acc: Accumulator::new(self.filter, self.unique_docs, self.need_distance),
            holder: NearestHolder::new(self.num_wanted, dist_error, self.unique_docs),
            metric: Metric {
                near: self.near,
                max_distance: self.max_distance,
                kind: self.kind,
            },
            start: self.start,
            scan_distance,
            want: box_around(&self.near, scan_distance),
        };
        let mut expand = ExpandState::new();

        if self.num_wanted > 0 {
            let num_wanted = i64::try_from(self.num_wanted).unwrap_or(i64::MAX);
            sink.run(&mut expand, &ctx, num_wanted)?;
        }

        Ok(NearCursor::new(&expand, sink, &ctx))
    }
}

/// Results of a finished `$near` search, nearest first.
#[derive(Debug)]
pub struct NearCursor {
    results: VecDeque<GeoMatch>,
    explain: ExplainStats,
    farthest: f64,
    found_in_exp: i64,
    bounds: Vec<GeoBox>,
}

impl NearCursor {
    fn new(expand: &ExpandState, sink: NearSink, ctx: &SearchContext) -> Self {
        let explain = ExplainStats {
            looked_at: sink.acc.looked_at,
            matches_performed: sink.acc.matches_performed,
            objects_loaded: sink.acc.objects_loaded,
            points_loaded: sink.acc.points_loaded,
            ..ExplainStats::default()
        };
        let farthest = sink.holder.farthest();
        let results = sink
            .holder
            .into_points()
            .filter_map(|pt| pt.to_match(true))
            .collect();

        Self {
            results,
            explain,
            farthest,
            found_in_exp: expand.found_in_exp,
            bounds: expand.index_bounds(ctx),
        }
    }

    /// Admission border at the end of the search.
    pub fn farthest(&self) -> f64 {
        self.farthest
    }

    /// Index keys examined.
    pub fn found_in_exp(&self) -> i64 {
        self.found_in_exp
    }

    pub fn explain(&self) -> ExplainStats {
        self.explain
    }

    pub fn index_bounds(&self) -> &[GeoBox] {
        &self.bounds
    }

    /// Results not yet returned.
    pub fn remaining(&self) -> usize {
        self.results.len()
    }
}

impl Iterator for NearCursor {
    type Item = Result<GeoMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.results.pop_front()?;
        self.explain.nscanned += 1;
        Some(Ok(m))
    }
}
