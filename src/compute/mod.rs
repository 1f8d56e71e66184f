//! Query engine for the 2d index.
//!
//! The engine is split the way the work flows:
//! - [`cursor`]: directional scans over the ordered index
//! - [`expand`]: the expanding-region state machine
//! - [`accumulator`]: candidate filtering shared by every search
//! - [`shape`]: `$within` shapes and their geometric predicates
//! - [`browse`]: the resumable `$within` cursor
//! - [`holder`] and [`near`]: the k-nearest `$near` search
//!
//! Everything here is single threaded and cooperative. Work is done in
//! bounded chunks and the [`Interrupt`] flag is checked between chunks.

pub(crate) mod accumulator;
pub mod browse;
pub(crate) mod cursor;
pub(crate) mod expand;
pub(crate) mod holder;
pub mod near;
pub(crate) mod point;
pub mod shape;

pub use browse::GeoBrowse;
pub use near::{NearCursor, NearSearch};
pub use shape::{DistanceKind, KeyResult, WithinShape};

use crate::config::SearchConfig;
use crate::error::{GeoError, Result};
use crate::index::Geo2dIndex;
use crate::storage::IndexBackend;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation flag shared between a running search and its owner.
///
/// ```rust
/// use geo2d::Interrupt;
///
/// let interrupt = Interrupt::new();
/// let handle = interrupt.clone();
/// assert!(interrupt.check().is_ok());
/// handle.trigger();
/// assert!(interrupt.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(GeoError::Interrupted)` once the flag has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            return Err(GeoError::Interrupted);
        }
        Ok(())
    }
}

/// Everything a search needs from its surroundings.
#[derive(Clone)]
pub struct SearchContext {
    pub(crate) backend: Arc<dyn IndexBackend>,
    pub(crate) index: Arc<Geo2dIndex>,
    pub(crate) config: SearchConfig,
    pub(crate) interrupt: Interrupt,
}

impl SearchContext {
    pub fn new(backend: Arc<dyn IndexBackend>, index: Arc<Geo2dIndex>) -> Self {
        Self {
            backend,
            index,
            config: SearchConfig::default(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn index(&self) -> &Arc<Geo2dIndex> {
        &self.index
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Per-call budget as the signed count the engine works in.
    pub(crate) fn budget(&self) -> i64 {
        self.config.max_points_heuristic.max(1) as i64
    }
}

/// Counters describing the work a search did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainStats {
    pub looked_at: u64,
    #[serde(rename = "matchesPerfd")]
    pub matches_performed: u64,
    pub objects_loaded: u64,
    pub points_loaded: u64,
    pub points_saved_for_yield: u64,
    pub points_changed_on_yield: u64,
    pub points_removed_on_yield: u64,
    pub nscanned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCollection;
    use serde_json::json;

    #[test]
    fn test_interrupt_shared() {
        let a = Interrupt::new();
        let b = a.clone();
        assert!(!a.is_triggered());
        b.trigger();
        assert!(a.is_triggered());
        assert!(matches!(a.check(), Err(GeoError::Interrupted)));
    }

    #[test]
    fn test_context_builders() {
        let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({})).unwrap());
        let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
        let ctx = SearchContext::new(coll, index)
            .with_config(SearchConfig::default().with_max_points_heuristic(7));
        assert_eq!(ctx.budget(), 7);
        assert!(!ctx.interrupt().is_triggered());
    }

    #[test]
    fn test_explain_serializes_camel_case() {
        let stats = ExplainStats {
            looked_at: 3,
            matches_performed: 1,
            ..Default::default()
        };
        let v = serde_json::to_value(stats).unwrap();
        assert_eq!(v["lookedAt"], 3);
        assert_eq!(v["matchesPerfd"], 1);
        assert_eq!(v["pointsRemovedOnYield"], 0);
    }
}
