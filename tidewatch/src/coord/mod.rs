//! Geographic primitives for the tracking engine.
//!
//! All coordinates are WGS84 degrees. A [`Viewport`] is the visible map
//! rectangle and may wrap the antimeridian, in which case `west > east`.

use std::fmt;

/// Minimum latitude shown by web-mercator map surfaces.
pub const MERCATOR_MIN_LAT: f64 = -85.0;

/// Maximum latitude shown by web-mercator map surfaces.
pub const MERCATOR_MAX_LAT: f64 = 85.0;

/// Precision used when fingerprinting viewport edges (1e-6 degrees).
const EDGE_SCALE: f64 = 1_000_000.0;

/// Precision used when fingerprinting zoom levels.
const ZOOM_SCALE: f64 = 1_000.0;

/// A longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Both components are finite real numbers.
    ///
    /// This is the only validation applied at ingestion; a non-finite
    /// position can never reach the store.
    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lon, self.lat)
    }
}

/// The geographic rectangle currently visible on the map, plus zoom level.
///
/// When `west > east` the box crosses the antimeridian and the longitude
/// test becomes `lon >= west || lon <= east`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Western edge (degrees).
    pub west: f64,
    /// Southern edge (degrees).
    pub south: f64,
    /// Eastern edge (degrees).
    pub east: f64,
    /// Northern edge (degrees).
    pub north: f64,
    /// Map zoom level.
    pub zoom: f64,
}

impl Viewport {
    /// Create a viewport from its edges and zoom level.
    pub fn new(west: f64, south: f64, east: f64, north: f64, zoom: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
            zoom,
        }
    }

    /// The whole mercator world at zoom 1.
    pub fn world() -> Self {
        Self::new(-180.0, MERCATOR_MIN_LAT, 180.0, MERCATOR_MAX_LAT, 1.0)
    }

    /// A viewport centred on a point with the given half extents.
    ///
    /// Longitudes that run past ±180° wrap around, producing an
    /// antimeridian-crossing box.
    pub fn centered(center: Position, half_width: f64, half_height: f64, zoom: f64) -> Self {
        let half_width = half_width.min(180.0);
        let (west, east) = if half_width >= 180.0 {
            (-180.0, 180.0)
        } else {
            (
                wrap_longitude(center.lon - half_width),
                wrap_longitude(center.lon + half_width),
            )
        };
        let south = (center.lat - half_height).max(MERCATOR_MIN_LAT);
        let north = (center.lat + half_height).min(MERCATOR_MAX_LAT);
        Self::new(west, south, east, north, zoom)
    }

    /// Whether this box wraps the ±180° line.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// All edges and the zoom are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite()
            && self.zoom.is_finite()
    }

    /// Point-in-box test with antimeridian handling.
    pub fn contains(&self, position: Position) -> bool {
        self.contains_lon_lat(position.lon, position.lat)
    }

    /// Point-in-box test on raw coordinates.
    pub fn contains_lon_lat(&self, lon: f64, lat: f64) -> bool {
        if lat < self.south || lat > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            lon >= self.west || lon <= self.east
        } else {
            lon >= self.west && lon <= self.east
        }
    }

    /// Value identity used to detect a stale backfill session.
    pub fn fingerprint(&self) -> ViewportFingerprint {
        ViewportFingerprint {
            west: quantize(self.west, EDGE_SCALE),
            south: quantize(self.south, EDGE_SCALE),
            east: quantize(self.east, EDGE_SCALE),
            north: quantize(self.north, EDGE_SCALE),
            zoom: quantize(self.zoom, ZOOM_SCALE),
        }
    }

    /// Bounding boxes as `[[min_lon, min_lat], [max_lon, max_lat]]`.
    ///
    /// An antimeridian-crossing viewport is split into two boxes, one on
    /// each side of the ±180° line.
    pub fn bounding_boxes(&self) -> Vec<[[f64; 2]; 2]> {
        if self.crosses_antimeridian() {
            vec![
                [[self.west, self.south], [180.0, self.north]],
                [[-180.0, self.south], [self.east, self.north]],
            ]
        } else {
            vec![[[self.west, self.south], [self.east, self.north]]]
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::world()
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[W{:.3} S{:.3} E{:.3} N{:.3} @z{:.1}]",
            self.west, self.south, self.east, self.north, self.zoom
        )
    }
}

/// Quantized viewport identity.
///
/// Two viewports with the same fingerprint are the same view for the
/// purposes of backfill invalidation; sub-micro-degree jitter is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportFingerprint {
    west: i64,
    south: i64,
    east: i64,
    north: i64,
    zoom: i64,
}

/// Normalize a longitude into `[-180, 180]`.
pub fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        return lon;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

fn quantize(value: f64, scale: f64) -> i64 {
    (value * scale).round() as i64
}
