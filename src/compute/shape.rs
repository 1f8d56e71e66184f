//! `$within` shapes and the geometry hooks the expanding search calls.

use crate::converter::GeoHashConverter;
use crate::error::{GeoError, Result};
use crate::hash::GeoHash;
use crate::shapes::{
    check_earth_bounds, compute_x_scan_distance, distance_within, rad2deg, spheredist_deg, GeoBox,
    Point, Polygon,
};
use crate::types::{container_entries, is_container, point_from_value};
use serde_json::Value;
use std::f64::consts::PI;

/// Outcome of testing a key's decoded location against a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyResult {
    /// Definitely outside.
    Bad,
    /// Within the encoding error of the boundary; the document must decide.
    Border,
    /// Definitely inside.
    Good,
}

/// How distances from a center are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceKind {
    /// Planar, in coordinate units.
    #[default]
    Plain,
    /// Great circle, in radians, over longitude/latitude degrees.
    Sphere,
}

#[derive(Debug, Clone)]
pub struct CircleShape {
    center: Point,
    start: GeoHash,
    max_distance: f64,
    x_scan: f64,
    y_scan: f64,
    bbox: GeoBox,
}

#[derive(Debug, Clone)]
pub struct BoxShape {
    want: GeoBox,
    region: GeoBox,
    want_len: f64,
    fudge: f64,
    start: GeoHash,
}

#[derive(Debug, Clone)]
pub struct PolygonShape {
    poly: Polygon,
    bounds: GeoBox,
    max_dim: f64,
    start: GeoHash,
}

/// A region a `$within` query asks for.
#[derive(Debug, Clone)]
pub enum WithinShape {
    Disk(CircleShape),
    SphericalDisk(CircleShape),
    Box(BoxShape),
    Polygon(PolygonShape),
}

fn shape_point(value: &Value) -> Result<Point> {
    point_from_value(value).map_err(GeoError::BadQuery)
}

impl WithinShape {
    /// `$center` / `$centerSphere`: `[[x, y], radius]`.
    pub fn center(conv: &GeoHashConverter, args: &Value, kind: DistanceKind) -> Result<Self> {
        let fields = container_entries(args);
        if fields.len() != 2 {
            return Err(GeoError::BadQuery(
                "$center needs 2 fields (middle,max distance)".into(),
            ));
        }
        if !is_container(fields[0]) {
            return Err(GeoError::BadQuery(
                "the first field of $center object must be a location object".into(),
            ));
        }

        let center = shape_point(fields[0])?;
        let start = conv.hash_point(&center)?;

        let max_distance = fields[1].as_f64().unwrap_or(0.0);
        // negated so NaN is rejected too
        if !(max_distance >= 0.0) {
            return Err(GeoError::BadQuery("need a max distance >= 0 ".into()));
        }

        let (x_scan, y_scan) = match kind {
            DistanceKind::Plain => {
                let scan = max_distance + conv.error();
                (scan, scan)
            }
            DistanceKind::Sphere => {
                if max_distance >= PI {
                    return Err(GeoError::OutOfBounds(
                        "Spherical MaxDistance > PI. Are you sure you are using radians?".into(),
                    ));
                }
                check_earth_bounds(&center)?;

                let y_scan = rad2deg(max_distance) + conv.error();
                let x_scan = compute_x_scan_distance(center.y, y_scan);
                if !(center.x + x_scan < 180.0
                    && center.x - x_scan > -180.0
                    && center.y + y_scan < 90.0
                    && center.y - y_scan > -90.0)
                {
                    return Err(GeoError::OutOfBounds(
                        "Spherical distance would require (unimplemented) wrapping".into(),
                    ));
                }
                (x_scan, y_scan)
            }
        };

        let bbox = GeoBox::from_corners(
            Point::new(center.x - x_scan, center.y - y_scan),
            Point::new(center.x + x_scan, center.y + y_scan),
        );
        log::debug!(
            "bounding box for circle query: {} (max distance {}) starting from {}",
            bbox,
            max_distance,
            center
        );

        let circle = CircleShape {
            center,
            start,
            max_distance,
            x_scan,
            y_scan,
            bbox,
        };
        Ok(match kind {
            DistanceKind::Plain => WithinShape::Disk(circle),
            DistanceKind::Sphere => WithinShape::SphericalDisk(circle),
        })
    }

    /// `$box`: two opposite corners, in any order.
    pub fn boxed(conv: &GeoHashConverter, args: &Value) -> Result<Self> {
        let fields = container_entries(args);
        if fields.len() != 2 {
            return Err(GeoError::BadQuery(
                "$box needs 2 fields (bottomLeft,topRight)".into(),
            ));
        }

        let mut want = GeoBox::from_corners(shape_point(fields[0])?, shape_point(fields[1])?);
        let mut region = want;
        region.fudge(conv.error());
        region.truncate(conv.min(), conv.max());
        want.truncate(conv.min(), conv.max());

        if !(want.area() > 0.0) {
            return Err(GeoError::BadQuery("need an area > 0 ".into()));
        }

        let start = conv.hash_point(&want.center())?;
        let fudge = conv.error();
        Ok(WithinShape::Box(BoxShape {
            want,
            region,
            want_len: fudge + want.max_dim() / 2.0,
            fudge,
            start,
        }))
    }

    /// `$polygon`: at least three vertices; the closing edge is implicit.
    pub fn polygon(conv: &GeoHashConverter, args: &Value) -> Result<Self> {
        let mut poly = Polygon::default();
        for vertex in container_entries(args) {
            poly.add(shape_point(vertex)?);
        }
        if poly.len() < 3 {
            return Err(GeoError::BadQuery(
                "polygon must be defined by three points or more".into(),
            ));
        }

        let mut bounds = poly.bounds();
        bounds.fudge(conv.error());
        bounds.truncate(conv.min(), conv.max());

        let start = conv.hash_point(&bounds.center())?;
        Ok(WithinShape::Polygon(PolygonShape {
            max_dim: conv.error() + bounds.max_dim() / 2.0,
            poly,
            bounds,
            start,
        }))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WithinShape::Disk(_) | WithinShape::SphericalDisk(_) => "circle",
            WithinShape::Box(_) => "box",
            WithinShape::Polygon(_) => "polygon",
        }
    }

    pub(crate) fn expand_start_hash(&self) -> GeoHash {
        match self {
            WithinShape::Disk(c) | WithinShape::SphericalDisk(c) => c.start,
            WithinShape::Box(b) => b.start,
            WithinShape::Polygon(p) => p.start,
        }
    }

    pub(crate) fn fits_in_box(&self, width: f64) -> bool {
        match self {
            WithinShape::Disk(c) | WithinShape::SphericalDisk(c) => width >= c.x_scan.max(c.y_scan),
            WithinShape::Box(b) => width >= b.want_len,
            WithinShape::Polygon(p) => p.max_dim <= width,
        }
    }

    pub(crate) fn intersects_box(&self, cell: &GeoBox) -> f64 {
        match self {
            WithinShape::Disk(c) | WithinShape::SphericalDisk(c) => cell.intersects(&c.bbox),
            WithinShape::Box(b) => cell.intersects(&b.region),
            WithinShape::Polygon(p) => cell.intersects(&p.bounds),
        }
    }

    /// Classify a key by its decoded location. The second value is the
    /// approximate distance for circles and 0 otherwise.
    pub(crate) fn approx_key_check(
        &self,
        conv: &GeoHashConverter,
        p: &Point,
    ) -> Result<(KeyResult, f64)> {
        match self {
            WithinShape::Disk(c) => {
                let d = c.center.distance(p);
                Ok((classify(d, c.max_distance, conv.error()), d))
            }
            WithinShape::SphericalDisk(c) => {
                check_earth_bounds(p)?;
                let d = spheredist_deg(&c.center, p);
                Ok((classify(d, c.max_distance, conv.error_sphere()), d))
            }
            WithinShape::Box(b) => {
                let result = if b.want.on_boundary(p, b.fudge) {
                    KeyResult::Border
                } else if b.want.inside(p, b.fudge) {
                    KeyResult::Good
                } else {
                    KeyResult::Bad
                };
                Ok((result, 0.0))
            }
            WithinShape::Polygon(poly) => {
                let result = match poly.poly.contains(p, conv.error()) {
                    0 => KeyResult::Border,
                    n if n > 0 => KeyResult::Good,
                    _ => KeyResult::Bad,
                };
                Ok((result, 0.0))
            }
        }
    }

    /// Exact, boundary inclusive test of a document location.
    pub(crate) fn exact_doc_check(&self, p: &Point) -> Result<(bool, f64)> {
        match self {
            WithinShape::Disk(c) => Ok((
                distance_within(&c.center, p, c.max_distance),
                c.center.distance(p),
            )),
            WithinShape::SphericalDisk(c) => {
                check_earth_bounds(p)?;
                let d = spheredist_deg(&c.center, p);
                Ok((d <= c.max_distance, d))
            }
            WithinShape::Box(b) => Ok((b.want.inside(p, 0.0), 0.0)),
            WithinShape::Polygon(poly) => Ok((poly.poly.contains_exact(p), 0.0)),
        }
    }
}

fn classify(d: f64, max_distance: f64, error: f64) -> KeyResult {
    if d >= max_distance - error && d <= max_distance + error {
        KeyResult::Border
    } else if d > max_distance {
        KeyResult::Bad
    } else {
        KeyResult::Good
    }
}
