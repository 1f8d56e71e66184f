//! Planar and spherical geometry primitives.
//!
//! Points, axis-aligned boxes and simple polygons, plus the distance helpers
//! used by the query shapes. Every approximate test takes a `fudge` margin
//! that absorbs the rounding error introduced by hashing.

use crate::error::{GeoError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// A 2d coordinate. For spherical queries `x` is longitude and `y` latitude, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Planar Euclidean distance.
    pub fn distance(&self, other: &Point) -> f64 {
        let a = self.x - other.x;
        let b = self.y - other.y;
        (a * a + b * b).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

impl From<geo::Point<f64>> for Point {
    fn from(p: geo::Point<f64>) -> Self {
        Point::new(p.x(), p.y())
    }
}

impl From<geo::Coord<f64>> for Point {
    fn from(c: geo::Coord<f64>) -> Self {
        Point::new(c.x, c.y)
    }
}

impl From<Point> for geo::Point<f64> {
    fn from(p: Point) -> Self {
        geo::Point::new(p.x, p.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point::new(x, y)
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoBox {
    pub min: Point,
    pub max: Point,
}

impl GeoBox {
    /// A box from two corners, normalized so `min <= max` on both axes.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// A square with lower-left corner `(x, y)` and the given edge length.
    pub fn square(x: f64, y: f64, size: f64) -> Self {
        Self {
            min: Point::new(x, y),
            max: Point::new(x + size, y + size),
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn area(&self) -> f64 {
        (self.max.x - self.min.x) * (self.max.y - self.min.y)
    }

    pub fn max_dim(&self) -> f64 {
        (self.max.x - self.min.x).max(self.max.y - self.min.y)
    }

    /// Grow the box by `error` on every side.
    pub fn fudge(&mut self, error: f64) {
        self.min.x -= error;
        self.min.y -= error;
        self.max.x += error;
        self.max.y += error;
    }

    /// Clamp the box to `[lo, hi]` on both axes.
    pub fn truncate(&mut self, lo: f64, hi: f64) {
        self.min.x = self.min.x.max(lo);
        self.min.y = self.min.y.max(lo);
        self.max.x = self.max.x.min(hi);
        self.max.y = self.max.y.min(hi);
    }

    /// Containment, inclusive of the boundary widened by `fudge`.
    pub fn inside(&self, p: &Point, fudge: f64) -> bool {
        between(self.min.x, self.max.x, p.x, fudge) && between(self.min.y, self.max.y, p.y, fudge)
    }

    /// Whether `p` lies within `fudge` of one of the four edges.
    pub fn on_boundary(&self, p: &Point, fudge: f64) -> bool {
        if !self.inside(p, fudge) {
            return false;
        }
        near(self.min.x, p.x, fudge)
            || near(self.max.x, p.x, fudge)
            || near(self.min.y, p.y, fudge)
            || near(self.max.y, p.y, fudge)
    }

    /// Fraction of this box's area covered by `other`: 0 when disjoint, 1 when covered.
    pub fn intersects(&self, other: &GeoBox) -> f64 {
        let lo_x = self.min.x.max(other.min.x);
        let hi_x = self.max.x.min(other.max.x);
        let lo_y = self.min.y.max(other.min.y);
        let hi_y = self.max.y.min(other.max.y);

        if lo_x > hi_x || lo_y > hi_y {
            return 0.0;
        }

        let area = self.area();
        if area <= 0.0 {
            // A degenerate box that touches `other` is entirely covered by it.
            return 1.0;
        }

        ((hi_x - lo_x) * (hi_y - lo_y)) / area
    }
}

impl fmt::Display for GeoBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -->> {}", self.min, self.max)
    }
}

impl From<geo::Rect<f64>> for GeoBox {
    fn from(rect: geo::Rect<f64>) -> Self {
        GeoBox::from_corners(rect.min().into(), rect.max().into())
    }
}

impl From<GeoBox> for geo::Rect<f64> {
    fn from(b: GeoBox) -> Self {
        geo::Rect::new(
            geo::coord! { x: b.min.x, y: b.min.y },
            geo::coord! { x: b.max.x, y: b.max.y },
        )
    }
}

fn between(min: f64, max: f64, val: f64, fudge: f64) -> bool {
    val >= min - fudge && val <= max + fudge
}

fn near(bound: f64, val: f64, fudge: f64) -> bool {
    val >= bound - fudge && val <= bound + fudge
}

/// A simple polygon given by its vertices; the closing edge is implicit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn add(&mut self, p: Point) {
        self.points.push(p);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Bounding box of the vertices.
    pub fn bounds(&self) -> GeoBox {
        let mut iter = self.points.iter();
        let Some(first) = iter.next() else {
            return GeoBox::default();
        };
        let mut bounds = GeoBox {
            min: *first,
            max: *first,
        };
        for p in iter {
            bounds.min.x = bounds.min.x.min(p.x);
            bounds.min.y = bounds.min.y.min(p.y);
            bounds.max.x = bounds.max.x.max(p.x);
            bounds.max.y = bounds.max.y.max(p.y);
        }
        bounds
    }

    /// Point-in-polygon test.
    ///
    /// Returns `1` inside, `-1` outside and `0` when `p` is within `fudge`
    /// of an edge and an exact test is needed. With `fudge == 0` the answer
    /// is never `0`; vertices and points on horizontal or vertical edges
    /// count as inside.
    ///
    /// `geo::Contains` has no fudge band, so the test is done here.
    pub fn contains(&self, p: &Point, fudge: f64) -> i32 {
        let n = self.points.len();
        if n == 0 {
            return -1;
        }

        let fudge_box = GeoBox {
            min: Point::new(p.x - fudge, p.y - fudge),
            max: Point::new(p.x + fudge, p.y + fudge),
        };

        let mut counter = 0;
        let mut p1 = self.points[0];
        for i in 1..=n {
            let p2 = self.points[i % n];

            if fudge > 0.0
                && fudge_box.min.y <= p1.y.max(p2.y)
                && fudge_box.max.y >= p1.y.min(p2.y)
                && fudge_box.min.x <= p1.x.max(p2.x)
                && fudge_box.max.x >= p1.x.min(p2.x)
            {
                // The segment's bounding box touches the fudge box.
                if fudge_box.inside(&p1, 0.0) || fudge_box.inside(&p2, 0.0) {
                    return 0;
                }

                if p1.y != p2.y {
                    let inv_slope = (p2.x - p1.x) / (p2.y - p1.y);
                    let x_top = (fudge_box.max.y - p1.y) * inv_slope + p1.x;
                    if fudge_box.min.x <= x_top && fudge_box.max.x >= x_top {
                        return 0;
                    }
                    let x_bottom = (fudge_box.min.y - p1.y) * inv_slope + p1.x;
                    if fudge_box.min.x <= x_bottom && fudge_box.max.x >= x_bottom {
                        return 0;
                    }
                }

                if p1.x != p2.x {
                    let slope = (p2.y - p1.y) / (p2.x - p1.x);
                    let y_right = (fudge_box.max.x - p1.x) * slope + p1.y;
                    if fudge_box.min.y <= y_right && fudge_box.max.y >= y_right {
                        return 0;
                    }
                    let y_left = (fudge_box.min.x - p1.x) * slope + p1.y;
                    if fudge_box.min.y <= y_left && fudge_box.max.y >= y_left {
                        return 0;
                    }
                }
            } else if fudge == 0.0 {
                if (p.x == p1.x && p.y == p1.y) || (p.x == p2.x && p.y == p2.y) {
                    return 1;
                }
                // Horizontal edges never cross the ray, so test them directly.
                if p1.y == p2.y && p.y == p1.y && p.x >= p1.x.min(p2.x) && p.x <= p1.x.max(p2.x)
                {
                    return 1;
                }
            }

            if p.y > p1.y.min(p2.y) && p.y <= p1.y.max(p2.y) && p.x <= p1.x.max(p2.x) && p1.y != p2.y
            {
                let x_inters = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                if p1.x == p2.x && p.x == p1.x {
                    // on a vertical edge
                    return 1;
                } else if p1.x == p2.x || p.x <= x_inters {
                    counter += 1;
                }
            }

            p1 = p2;
        }

        if counter % 2 == 0 { -1 } else { 1 }
    }

    /// Exact containment, boundary inclusive.
    pub fn contains_exact(&self, p: &Point) -> bool {
        self.contains(p, 0.0) > 0
    }
}

impl From<&geo::Polygon<f64>> for Polygon {
    fn from(poly: &geo::Polygon<f64>) -> Self {
        let mut points: Vec<Point> = poly.exterior().coords().map(|c| Point::from(*c)).collect();
        // geo closes its rings; the closing edge here is implicit.
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Polygon::new(points)
    }
}

pub fn deg2rad(deg: f64) -> f64 {
    deg * (PI / 180.0)
}

pub fn rad2deg(rad: f64) -> f64 {
    rad * (180.0 / PI)
}

/// Great-circle distance in radians between two points given in radians.
///
/// Unlike `geo::Haversine` this works on the unit sphere and clamps the
/// cosine, so radii and `$maxDistance` stay in radians.
pub fn spheredist_rad(p1: &Point, p2: &Point) -> f64 {
    // n-vector formula with the cross product inlined
    let (sin_x1, cos_x1) = p1.x.sin_cos();
    let (sin_y1, cos_y1) = p1.y.sin_cos();
    let (sin_x2, cos_x2) = p2.x.sin_cos();
    let (sin_y2, cos_y2) = p2.y.sin_cos();

    let cross_prod = (cos_y1 * cos_x1 * cos_y2 * cos_x2)
        + (cos_y1 * sin_x1 * cos_y2 * sin_x2)
        + (sin_y1 * sin_y2);

    if cross_prod >= 1.0 || cross_prod <= -1.0 {
        return if cross_prod > 0.0 { 0.0 } else { PI };
    }

    cross_prod.acos()
}

/// Great-circle distance in radians between two points given in degrees.
///
/// ```rust
/// use geo2d::shapes::{spheredist_deg, Point};
///
/// let bna = Point::new(-86.67, 36.12);
/// let lax = Point::new(-118.40, 33.94);
/// let d = spheredist_deg(&bna, &lax);
/// assert!((0.45305..=0.45307).contains(&d));
/// ```
pub fn spheredist_deg(p1: &Point, p2: &Point) -> f64 {
    spheredist_rad(
        &Point::new(deg2rad(p1.x), deg2rad(p1.y)),
        &Point::new(deg2rad(p2.x), deg2rad(p2.y)),
    )
}

/// Whether `p2` is within `radius` of `p1`, boundary inclusive, without a square root.
pub fn distance_within(p1: &Point, p2: &Point, radius: f64) -> bool {
    let a = p2.x - p1.x;
    let b = p2.y - p1.y;
    a * a + b * b <= radius * radius
}

/// Reject points that are not valid longitude/latitude pairs.
pub fn check_earth_bounds(p: &Point) -> Result<()> {
    if p.x < -180.0 || p.x > 180.0 || p.y < -90.0 || p.y > 90.0 {
        return Err(GeoError::OutOfBounds(format!(
            "point {} must be in earth-like bounds of long : [-180, 180], lat : [-90, 90]",
            p
        )));
    }
    Ok(())
}

/// Longitude span needed to cover `max_dist_degrees` around latitude `y`.
///
/// Overestimates for large distances far from the equator.
pub fn compute_x_scan_distance(y: f64, max_dist_degrees: f64) -> f64 {
    max_dist_degrees
        / deg2rad((y + max_dist_degrees).min(89.0))
            .cos()
            .min(deg2rad((y - max_dist_degrees).max(-89.0)).cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            Point::new(x, y),
            Point::new(x + size, y),
            Point::new(x + size, y + size),
            Point::new(x, y + size),
        ])
    }

    #[test]
    fn test_box_display() {
        let b = GeoBox::square(5.0, 5.0, 2.0);
        assert_eq!(b.to_string(), "(5,5) -->> (7,7)");
    }

    #[test]
    fn test_box_inside() {
        let b = GeoBox::from_corners(
            Point::new(29.762283, -95.364271),
            Point::new(29.764283000000002, -95.36227099999999),
        );
        assert!(b.inside(&Point::new(29.763, -95.363), 0.0));
        assert!(!b.inside(&Point::new(32.9570255, -96.1082497), 0.0));
        assert!(!b.inside(&Point::new(32.9570255, -96.1082497), 0.01));
    }

    #[test]
    fn test_box_boundary() {
        let b = GeoBox::from_corners(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        assert!(b.on_boundary(&Point::new(0.0, 5.0), 0.001));
        assert!(b.on_boundary(&Point::new(10.0005, 10.0), 0.001));
        assert!(!b.on_boundary(&Point::new(5.0, 5.0), 0.001));
        assert!(!b.on_boundary(&Point::new(0.0, 50.0), 0.001));
        assert!(b.inside(&Point::new(10.0, 10.0), 0.0));
    }

    #[test]
    fn test_box_intersects() {
        let b = GeoBox::square(0.0, 0.0, 2.0);
        assert_eq!(b.intersects(&GeoBox::square(5.0, 5.0, 1.0)), 0.0);
        assert_eq!(b.intersects(&GeoBox::square(-1.0, -1.0, 10.0)), 1.0);
        assert!((b.intersects(&GeoBox::square(1.0, 0.0, 2.0)) - 0.5).abs() < 1e-12);
        assert!((b.intersects(&GeoBox::square(1.0, 1.0, 2.0)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_box_fudge_and_truncate() {
        let mut b = GeoBox::from_corners(Point::new(170.0, -10.0), Point::new(179.0, 10.0));
        b.fudge(2.0);
        assert_eq!(b.min, Point::new(168.0, -12.0));
        b.truncate(-180.0, 180.0);
        assert_eq!(b.max, Point::new(180.0, 12.0));
        assert_eq!(b.center(), Point::new(174.0, 0.0));
        assert_eq!(b.max_dim(), 24.0);
    }

    #[test]
    fn test_polygon_contains() {
        let poly = square(0.0, 0.0, 10.0);
        assert_eq!(poly.contains(&Point::new(5.0, 5.0), 0.0), 1);
        assert_eq!(poly.contains(&Point::new(15.0, 5.0), 0.0), -1);
        assert_eq!(poly.contains(&Point::new(-1.0, 5.0), 0.0), -1);
        assert!(poly.contains_exact(&Point::new(0.0, 0.0)));
        assert!(poly.contains_exact(&Point::new(10.0, 5.0)));
        assert!(poly.contains_exact(&Point::new(5.0, 10.0)));
    }

    #[test]
    fn test_polygon_contains_with_fudge() {
        let poly = square(0.0, 0.0, 10.0);
        assert_eq!(poly.contains(&Point::new(5.0, 5.0), 0.1), 1);
        assert_eq!(poly.contains(&Point::new(10.05, 5.0), 0.1), 0);
        assert_eq!(poly.contains(&Point::new(5.0, -0.05), 0.1), 0);
        assert_eq!(poly.contains(&Point::new(20.0, 5.0), 0.1), -1);
    }

    #[test]
    fn test_polygon_triangle() {
        let tri = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ]);
        assert_eq!(tri.contains(&Point::new(2.0, 2.0), 0.0), 1);
        assert_eq!(tri.contains(&Point::new(8.0, 8.0), 0.0), -1);
        assert_eq!(tri.contains(&Point::new(5.0, 5.001), 0.01), 0);
        let bounds = tri.bounds();
        assert_eq!(bounds.min, Point::new(0.0, 0.0));
        assert_eq!(bounds.max, Point::new(10.0, 10.0));
    }

    #[test]
    fn test_polygon_from_geo() {
        let poly = geo::Polygon::new(
            geo::LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)]),
            vec![],
        );
        let ours = Polygon::from(&poly);
        assert_eq!(ours.len(), 3);
        assert!(ours.contains_exact(&Point::new(3.0, 1.0)));
    }

    #[test]
    fn test_spheredist_worked_example() {
        let bna = Point::new(-86.67, 36.12);
        let lax = Point::new(-118.40, 33.94);
        let d1 = spheredist_deg(&bna, &lax);
        let d2 = spheredist_deg(&lax, &bna);
        assert!((0.45305..=0.45307).contains(&d1));
        assert!((0.45305..=0.45307).contains(&d2));

        let bna = Point::new(-1.5127, 0.6304);
        let lax = Point::new(-2.0665, 0.5924);
        let d = spheredist_rad(&bna, &lax);
        assert!((0.45305..=0.45307).contains(&d));
    }

    #[test]
    fn test_spheredist_miles() {
        let jfk = Point::new(-73.77694444, 40.63861111);
        let lax = Point::new(-118.40, 33.94);
        let earth_radius_miles = 6371.0 * 0.621371192;
        let dist = spheredist_deg(&jfk, &lax) * earth_radius_miles;
        assert!(dist > 2469.0 && dist < 2470.0);
    }

    #[test]
    fn test_spheredist_degenerate() {
        let bna = Point::new(-86.67, 36.12);
        assert!(spheredist_deg(&bna, &bna) < 1e-6);

        let zero = Point::new(0.0, 0.0);
        let antizero = Point::new(0.0, -180.0);
        assert!(spheredist_deg(&zero, &zero) < 1e-6);
        assert!((PI - spheredist_deg(&zero, &antizero)).abs() < 1e-6);
        assert!((PI - spheredist_deg(&antizero, &zero)).abs() < 1e-6);
    }

    #[test]
    fn test_earth_bounds() {
        assert!(check_earth_bounds(&Point::new(180.0, 90.0)).is_ok());
        assert!(check_earth_bounds(&Point::new(-180.0, -90.0)).is_ok());
        assert!(matches!(
            check_earth_bounds(&Point::new(0.0, 91.0)),
            Err(GeoError::OutOfBounds(_))
        ));
        assert!(check_earth_bounds(&Point::new(181.0, 0.0)).is_err());
    }

    #[test]
    fn test_distance_helpers() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert!(distance_within(&a, &b, 5.0));
        assert!(!distance_within(&a, &b, 4.999));
    }

    #[test]
    fn test_x_scan_distance_widens_away_from_equator() {
        let at_equator = compute_x_scan_distance(0.0, 1.0);
        let at_sixty = compute_x_scan_distance(60.0, 1.0);
        assert!(at_equator >= 1.0);
        assert!(at_sixty > 1.9);
        assert!((rad2deg(deg2rad(42.0)) - 42.0).abs() < 1e-12);
    }
}
