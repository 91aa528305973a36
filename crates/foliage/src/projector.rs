//! Pixel <-> geographic conversions for the overhead capture.
//!
//! The capture rasters are laid out with the row index driving longitude and
//! the column index driving latitude:
//!
//! ```text
//! lon = lerp(min_lon, max_lon, 1 - y / height)
//! lat = lerp(min_lat, max_lat, x / width)
//! ```

use crate::error::{FoliageError, Result};
use crate::host::CoordinateTransform;
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Normalized depth per centimetre in the normal/depth capture.
const DEPTH_SCALE: f64 = 0.00001;
const CENTIMETRES_PER_METRE: f64 = 100.0;

/// Longitude / latitude in degrees, height in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub height: f64,
}

impl GeoPoint {
    pub const fn new(lon: f64, lat: f64, height: f64) -> Self {
        Self { lon, lat, height }
    }
}

/// Axis-aligned capture volume in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl WorldBounds {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extent(center: DVec3, half_extent: DVec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }
}

/// Geographic rectangle covered by one capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureExtents {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    /// Height of the capture camera; depth is decoded relative to it.
    pub elevation: f64,
}

impl CaptureExtents {
    /// Converts the bounds' min and max corners. The corners are taken as-is,
    /// so a rotated volume can yield `min_lon > max_lon`.
    pub fn from_world_bounds(
        bounds: &WorldBounds,
        coordinates: &dyn CoordinateTransform,
        elevation: f64,
    ) -> Self {
        let min = coordinates.world_to_geodetic(bounds.min);
        let max = coordinates.world_to_geodetic(bounds.max);
        Self {
            min_lon: min.lon,
            min_lat: min.lat,
            max_lon: max.lon,
            max_lat: max.lat,
            elevation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoord {
    pub x: f64,
    pub y: f64,
}

impl PixelCoord {
    /// Truncates toward zero.
    pub fn index(&self) -> (i64, i64) {
        (self.x as i64, self.y as i64)
    }
}

#[inline]
fn lerp(a: f64, b: f64, alpha: f64) -> f64 {
    a + (b - a) * alpha
}

fn check_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(FoliageError::invalid(format!(
            "raster size {width}x{height} has no pixels"
        )));
    }
    Ok(())
}

pub fn pixel_to_geographic(
    x: f64,
    y: f64,
    elevation: f64,
    width: u32,
    height: u32,
    extents: &CaptureExtents,
) -> Result<GeoPoint> {
    check_size(width, height)?;
    let ax = x / width as f64;
    let ay = y / height as f64;
    Ok(GeoPoint {
        lon: lerp(extents.min_lon, extents.max_lon, 1.0 - ay),
        lat: lerp(extents.min_lat, extents.max_lat, ax),
        height: elevation,
    })
}

pub fn geographic_to_pixel(
    lon: f64,
    lat: f64,
    width: u32,
    height: u32,
    extents: &CaptureExtents,
) -> Result<PixelCoord> {
    check_size(width, height)?;
    let lon_span = extents.max_lon - extents.min_lon;
    let lat_span = extents.max_lat - extents.min_lat;
    if lon_span == 0.0 || lat_span == 0.0 || !lon_span.is_finite() || !lat_span.is_finite() {
        return Err(FoliageError::invalid(format!(
            "degenerate capture extents {extents:?}"
        )));
    }

    let a_lon = (lon - extents.min_lon) / lon_span;
    let a_lat = (lat - extents.min_lat) / lat_span;
    Ok(PixelCoord {
        x: lerp(0.0, width as f64, a_lat),
        y: lerp(height as f64, 0.0, a_lon),
    })
}

/// Height in metres for a normalized depth sample. A depth of 1 sits at
/// `capture_elevation`; every 0.01 below that is 10 m lower. Values outside
/// [0, 1] extrapolate.
#[inline]
pub fn decode_elevation(depth: f64, capture_elevation: f64) -> f64 {
    capture_elevation - (1.0 - depth) / DEPTH_SCALE / CENTIMETRES_PER_METRE
}

/// Straight-line distance in (lon, lat, height) space. Mixes degrees and
/// metres; only meaningful for comparing points at the same height.
#[inline]
pub fn geographic_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    DVec3::new(a.lon, a.lat, a.height).distance(DVec3::new(b.lon, b.lat, b.height))
}
