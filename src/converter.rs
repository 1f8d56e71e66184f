//! Mapping between floating point coordinates and [`GeoHash`] cells.

use crate::config::IndexOptions;
use crate::error::{GeoError, Result};
use crate::hash::GeoHash;
use crate::shapes::{deg2rad, GeoBox, Point};

const MACHINE_PRECISION: f64 = 0.5 * f64::EPSILON;

/// Scales coordinates in `[min, max]` onto the 32-bit hash grid and back.
///
/// The converter also knows how far a decoded point can drift from the
/// original coordinate; that bound is the `fudge` every approximate test uses.
///
/// # Examples
///
/// ```rust
/// use geo2d::{GeoHashConverter, IndexOptions};
///
/// let conv = GeoHashConverter::new(IndexOptions::default()).unwrap();
/// let h = conv.hash(73.01212, 41.352964).unwrap();
/// let p = conv.unhash_to_point(&h);
/// assert!((p.x - 73.01212).abs() < conv.size_edge(conv.bits()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHashConverter {
    options: IndexOptions,
    scaling: f64,
    error: f64,
    error_sphere: f64,
    error_unhash_to_box: f64,
}

impl GeoHashConverter {
    pub fn new(options: IndexOptions) -> Result<Self> {
        options.validate()?;

        let scaling = (1u64 << 32) as f64 / (options.max - options.min);
        let mut conv = Self {
            options,
            scaling,
            error: 0.0,
            error_sphere: 0.0,
            error_unhash_to_box: 0.0,
        };

        // One diagonal step at full precision, plus a hundredth of a bucket.
        let a = GeoHash::from_coords(0, 0, options.bits);
        let mut b = a;
        b.move_by(1, 1);
        conv.error = conv.distance_between_hashes(&a, &b) + 0.001 / scaling;
        conv.error_sphere = deg2rad(conv.error);
        conv.error_unhash_to_box =
            options.min.abs().max(options.max.abs()) * MACHINE_PRECISION * 8.0;

        Ok(conv)
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn bits(&self) -> u32 {
        self.options.bits
    }

    pub fn min(&self) -> f64 {
        self.options.min
    }

    pub fn max(&self) -> f64 {
        self.options.max
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Largest planar distance between a point and its decoded cell corner.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// [`GeoHashConverter::error`] expressed in radians.
    pub fn error_sphere(&self) -> f64 {
        self.error_sphere
    }

    /// Hash a coordinate pair at the index precision.
    pub fn hash(&self, x: f64, y: f64) -> Result<GeoHash> {
        let (min, max) = (self.options.min, self.options.max);
        if !(x >= min && x <= max && y >= min && y <= max) {
            return Err(GeoError::OutOfBounds(format!(
                "point not in interval of [ {}, {} ] :: caused by :: [ {}, {} ]",
                min, max, x, y
            )));
        }

        Ok(GeoHash::from_coords(
            self.to_hash_scale(x),
            self.to_hash_scale(y),
            self.options.bits,
        ))
    }

    pub fn hash_point(&self, p: &Point) -> Result<GeoHash> {
        self.hash(p.x, p.y)
    }

    /// Lower-left corner of the hash's cell.
    pub fn unhash(&self, h: &GeoHash) -> (f64, f64) {
        let (x, y) = h.unhash();
        (self.from_hash_scale(x), self.from_hash_scale(y))
    }

    pub fn unhash_to_point(&self, h: &GeoHash) -> Point {
        let (x, y) = self.unhash(h);
        Point::new(x, y)
    }

    pub fn distance_between_hashes(&self, a: &GeoHash, b: &GeoHash) -> f64 {
        self.unhash_to_point(a).distance(&self.unhash_to_point(b))
    }

    /// Edge length of a cell at `level`.
    pub fn size_edge(&self, level: u32) -> f64 {
        debug_assert!(level <= self.options.bits);
        (self.options.max - self.options.min) * 2f64.powi(-(level as i32))
    }

    /// Length of a cell's diagonal.
    pub fn size_of_diag(&self, h: &GeoHash) -> f64 {
        let mut b = *h;
        b.move_by(1, 1);
        self.distance_between_hashes(h, &b)
    }

    /// The cell of `h` as a box, without any error margin.
    pub fn make_box(&self, h: &GeoHash) -> GeoBox {
        let min = self.unhash_to_point(h);
        GeoBox::square(min.x, min.y, self.size_edge(h.bits()))
    }

    /// A box guaranteed to cover every point that hashes into `h`.
    pub fn unhash_to_box_covering(&self, h: &GeoHash) -> GeoBox {
        if !h.constrains() {
            return GeoBox::from_corners(
                Point::new(self.options.min, self.options.min),
                Point::new(self.options.max, self.options.max),
            );
        }

        let mut cell = self.make_box(h);
        cell.fudge(self.error_unhash_to_box);
        cell
    }

    fn to_hash_scale(&self, mut v: f64) -> u32 {
        if v == self.options.max {
            // keep max from aliasing with min
            v -= self.error / 2.0;
        }
        ((v - self.options.min) * self.scaling) as u32
    }

    fn from_hash_scale(&self, v: u32) -> f64 {
        v as f64 / self.scaling + self.options.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> GeoHashConverter {
        GeoHashConverter::new(IndexOptions::default()).unwrap()
    }

    #[test]
    fn test_round_trip_known_points() {
        let c = conv();
        for (x, y) in [(73.01212, 41.352964), (-73.01212, 41.352964)] {
            let p = c.unhash_to_point(&c.hash(x, y).unwrap());
            assert!((p.x - x).abs() < c.size_edge(c.bits()));
            assert!((p.y - y).abs() < c.size_edge(c.bits()));
            assert!(p.x <= x && p.y <= y);
        }
    }

    #[test]
    fn test_round_trip_grid() {
        for bits in [1, 8, 26, 32] {
            let c = GeoHashConverter::new(IndexOptions::default().with_bits(bits)).unwrap();
            let edge = c.size_edge(bits);
            let mut x = -180.0;
            while x <= 180.0 {
                let mut y = -180.0;
                while y <= 180.0 {
                    let p = c.unhash_to_point(&c.hash(x, y).unwrap());
                    assert!((p.x - x).abs() <= edge, "bits {} x {} -> {}", bits, x, p.x);
                    assert!((p.y - y).abs() <= edge, "bits {} y {} -> {}", bits, y, p.y);
                    y += 17.3;
                }
                x += 13.7;
            }
        }
    }

    #[test]
    fn test_distance_between_hashes() {
        let c = conv();
        let d = c.distance_between_hashes(&c.hash(1.0, 1.0).unwrap(), &c.hash(4.0, 5.0).unwrap());
        assert!((d - 5.0).abs() < 1e-4);
        let d = c.distance_between_hashes(&c.hash(50.0, 50.0).unwrap(), &c.hash(42.0, 44.0).unwrap());
        assert!((d - 10.0).abs() < 1e-3);
        let d = c.distance_between_hashes(&c.hash(50.0, 50.0).unwrap(), &c.hash(48.0, 54.0).unwrap());
        assert!((d - 4.47214).abs() < 1e-3);
    }

    #[test]
    fn test_hash_order_matches_key_order() {
        let c = conv();
        let a = c.hash(5.0, 5.0).unwrap();
        let b = c.hash(5.0, 7.0).unwrap();
        let d = c.hash(100.0, 100.0).unwrap();
        assert!(a.to_key() < b.to_key());
        assert!(a.to_key() < d.to_key());
    }

    #[test]
    fn test_hash_out_of_bounds() {
        let c = conv();
        assert!(matches!(c.hash(181.0, 0.0), Err(GeoError::OutOfBounds(_))));
        assert!(c.hash(0.0, -180.5).is_err());
        assert!(c.hash(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_max_edge_does_not_alias_min() {
        let c = conv();
        let h = c.hash(180.0, 180.0).unwrap();
        assert!(h.at_max_x());
        assert!(h.at_max_y());
        let low = c.hash(-180.0, -180.0).unwrap();
        assert!(low.at_min_x() && low.at_min_y());
    }

    #[test]
    fn test_error_bounds() {
        let c = conv();
        let edge = c.size_edge(26);
        assert!(c.error() > edge * std::f64::consts::SQRT_2);
        assert!(c.error() < edge * 1.5);
        assert!((c.error_sphere() - deg2rad(c.error())).abs() < 1e-18);
    }

    #[test]
    fn test_size_edge() {
        let c = conv();
        assert_eq!(c.size_edge(0), 360.0);
        assert_eq!(c.size_edge(1), 180.0);
        assert_eq!(c.size_edge(3), 45.0);
    }

    #[test]
    fn test_boxes() {
        let c = conv();
        let root = c.unhash_to_box_covering(&GeoHash::new());
        assert_eq!(root.min, Point::new(-180.0, -180.0));
        assert_eq!(root.max, Point::new(180.0, 180.0));

        let cell: GeoHash = "11".parse().unwrap();
        let b = c.make_box(&cell);
        assert_eq!(b.min, Point::new(0.0, 0.0));
        assert_eq!(b.max, Point::new(180.0, 180.0));

        let covering = c.unhash_to_box_covering(&cell);
        assert!(covering.min.x < 0.0 && covering.max.x > 180.0);
        assert!(c.size_of_diag(&cell) > 254.0);
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(GeoHashConverter::new(IndexOptions::default().with_bounds(5.0, 5.0)).is_err());
        assert!(GeoHashConverter::new(IndexOptions::default().with_bits(40)).is_err());
    }
}
