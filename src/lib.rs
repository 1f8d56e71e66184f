//! Query engine for legacy 2d geohash indexes.
//!
//! Documents carry planar (or longitude/latitude) locations that are hashed
//! into interleaved-bit keys and kept in an ordered index. Queries expand
//! outward from a starting cell over that index:
//!
//! - `$near` / `$nearSphere` and the `geoNear` command return the k nearest
//!   documents, nearest first,
//! - `$within` with `$center`, `$centerSphere`, `$box` or `$polygon` browses
//!   every document inside a shape, and survives concurrent writes between
//!   results.
//!
//! ```rust
//! use geo2d::{Geo2dIndex, MemoryCollection, SearchConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let index = Arc::new(Geo2dIndex::new(&json!({"loc": "2d"}), &json!({}))?);
//! let coll = Arc::new(MemoryCollection::new(Arc::clone(&index)));
//! coll.insert(json!({"_id": 1, "loc": [-73.99, 40.73]}))?;
//! coll.insert(json!({"_id": 2, "loc": [-0.12, 51.50]}))?;
//!
//! let query = json!({"loc": {"$near": [-74.0, 40.7]}});
//! let nearest = index
//!     .new_cursor(coll, &query, 1, SearchConfig::default())?
//!     .next()
//!     .unwrap()?;
//! assert_eq!(nearest.document["_id"], 1);
//! # Ok::<(), geo2d::GeoError>(())
//! ```

pub mod command;
pub mod compute;
pub mod config;
pub mod converter;
pub mod error;
pub mod filter;
pub mod hash;
pub mod index;
pub mod query;
pub mod shapes;
pub mod storage;
pub mod types;

pub use command::{geo_near, geo_walk, GeoNearRequest, GeoNearResponse};
pub use compute::{
    DistanceKind, ExplainStats, GeoBrowse, Interrupt, KeyResult, NearCursor, NearSearch,
    SearchContext, WithinShape,
};
pub use config::{IndexOptions, SearchConfig};
pub use converter::GeoHashConverter;
pub use error::{GeoError, Result};
pub use filter::Filter;
pub use hash::GeoHash;
pub use index::Geo2dIndex;
pub use query::GeoCursor;
pub use shapes::{GeoBox, Point, Polygon};
pub use storage::{IndexBackend, MemoryCollection, StorageStats};
pub use types::{Direction, Document, GeoMatch, RecordId, Suitability};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoError, Geo2dIndex, Result, SearchConfig};

    pub use crate::{GeoBox, Point, Polygon};

    pub use crate::{GeoBrowse, GeoCursor, NearSearch, SearchContext, WithinShape};

    pub use crate::{IndexBackend, MemoryCollection};
}
