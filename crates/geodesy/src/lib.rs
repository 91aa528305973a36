//! WGS-84 geodesy and a local tangent-plane georeference.
//!
//! - Geodetic (latitude, longitude, ellipsoidal height) <-> ECEF conversions.
//! - East-North-Up bases at any geodetic location.
//! - [`Georeference`]: an engine frame whose axes are the ENU basis at a fixed
//!   origin. Engine X points east, Y north and Z up at the origin; everywhere
//!   else the local up diverges from +Z with the curvature of the ellipsoid.
//!
//! All angles are degrees at the API boundary and all distances are metres.

use glam::{DMat3, DVec3};
use thiserror::Error;

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Semi-minor axis (polar radius) in meters.
    pub const B: f64 = A * (1.0 - F);

    /// Second eccentricity squared.
    pub const E2P: f64 = (A * A - B * B) / (B * B);
}

#[derive(Debug, Error, PartialEq)]
pub enum GeodesyError {
    #[error("latitude {0} is outside [-90, 90] degrees")]
    LatitudeOutOfRange(f64),
    #[error("non-finite geodetic coordinate ({lat_deg}, {lon_deg}, {height_m})")]
    NonFinite {
        lat_deg: f64,
        lon_deg: f64,
        height_m: f64,
    },
}

/// A geodetic position on the WGS-84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Geodetic {
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Height above the ellipsoid in meters.
    pub height_m: f64,
}

impl Geodetic {
    #[inline]
    pub fn new(lat_deg: f64, lon_deg: f64, height_m: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            height_m,
        }
    }

    /// Rejects NaN/infinite components and latitudes beyond the poles.
    pub fn validate(&self) -> Result<(), GeodesyError> {
        if !(self.lat_deg.is_finite() && self.lon_deg.is_finite() && self.height_m.is_finite()) {
            return Err(GeodesyError::NonFinite {
                lat_deg: self.lat_deg,
                lon_deg: self.lon_deg,
                height_m: self.height_m,
            });
        }
        if !(-90.0..=90.0).contains(&self.lat_deg) {
            return Err(GeodesyError::LatitudeOutOfRange(self.lat_deg));
        }
        Ok(())
    }

    #[inline]
    pub fn to_ecef(self) -> DVec3 {
        DVec3::from(geodetic_to_ecef(self.lat_deg, self.lon_deg, self.height_m))
    }

    #[inline]
    pub fn from_ecef(ecef: DVec3) -> Self {
        let (lat_deg, lon_deg, height_m) = ecef_to_geodetic(ecef.x, ecef.y, ecef.z);
        Self {
            lat_deg,
            lon_deg,
            height_m,
        }
    }
}

#[inline]
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, h_m: f64) -> [f64; 3] {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();

    // Radius of curvature in the prime vertical (N)
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    let x = (n + h_m) * cos_lat * cos_lon;
    let y = (n + h_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - wgs84::E2) + h_m) * sin_lat;

    [x, y, z]
}

/// Bowring's closed-form inverse; sub-millimetre for terrestrial heights.
#[inline]
pub fn ecef_to_geodetic(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    // Distance from the Z-axis
    let p = (x * x + y * y).sqrt();
    let lon = y.atan2(x);

    // Parametric latitude estimate (θ)
    let theta = (z * wgs84::A).atan2(p * wgs84::B);
    let (sin_theta, cos_theta) = theta.sin_cos();

    let lat_numerator = z + wgs84::E2P * wgs84::B * sin_theta * sin_theta * sin_theta;
    let lat_denominator = p - wgs84::E2 * wgs84::A * cos_theta * cos_theta * cos_theta;
    let lat = lat_numerator.atan2(lat_denominator);

    let sin_lat = lat.sin();
    let n = wgs84::A / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    // Near the poles cos(lat) -> 0, so measure height along Z instead.
    let h = if lat.cos().abs() > 1e-10 {
        p / lat.cos() - n
    } else {
        z.abs() - wgs84::B
    };

    (lat.to_degrees(), lon.to_degrees(), h)
}

/// East, north and up unit vectors (ECEF components) at a geodetic location.
#[inline]
pub fn enu_basis_ecef(lat_deg: f64, lon_deg: f64) -> (DVec3, DVec3, DVec3) {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();

    let east = DVec3::new(-sin_lon, cos_lon, 0.0);
    let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
    (east, north, up)
}

/// Local tangent-plane engine frame anchored at a geodetic origin.
///
/// `translate_origin` shifts the engine origin without changing the frame's
/// orientation, which is what a world-origin rebase does to every world-space
/// coordinate.
#[derive(Debug, Clone)]
pub struct Georeference {
    origin: Geodetic,
    origin_ecef: DVec3,
    /// Columns are east, north, up at the origin (ECEF components).
    enu_to_ecef: DMat3,
    ecef_to_enu: DMat3,
    /// Accumulated world-origin shift in engine coordinates.
    origin_shift: DVec3,
}

impl Georeference {
    pub fn new(origin: Geodetic) -> Result<Self, GeodesyError> {
        origin.validate()?;
        let (east, north, up) = enu_basis_ecef(origin.lat_deg, origin.lon_deg);
        let enu_to_ecef = DMat3::from_cols(east, north, up);

        Ok(Self {
            origin,
            origin_ecef: origin.to_ecef(),
            enu_to_ecef,
            ecef_to_enu: enu_to_ecef.transpose(),
            origin_shift: DVec3::ZERO,
        })
    }

    #[inline]
    pub fn origin(&self) -> Geodetic {
        self.origin
    }

    #[inline]
    pub fn origin_shift(&self) -> DVec3 {
        self.origin_shift
    }

    /// Moves the engine origin by `delta` (engine coordinates). Positions of
    /// fixed ECEF points decrease by `delta` afterwards.
    pub fn translate_origin(&mut self, delta: DVec3) {
        self.origin_shift += delta;
    }

    #[inline]
    pub fn ecef_to_local(&self, ecef: DVec3) -> DVec3 {
        self.ecef_to_enu * (ecef - self.origin_ecef) - self.origin_shift
    }

    #[inline]
    pub fn local_to_ecef(&self, local: DVec3) -> DVec3 {
        self.origin_ecef + self.enu_to_ecef * (local + self.origin_shift)
    }

    pub fn local_to_geodetic(&self, local: DVec3) -> Geodetic {
        Geodetic::from_ecef(self.local_to_ecef(local))
    }

    pub fn geodetic_to_local(&self, geodetic: Geodetic) -> DVec3 {
        self.ecef_to_local(geodetic.to_ecef())
    }

    /// ENU basis at an engine position, expressed in engine axes
    /// (columns: east, north, up).
    pub fn enu_at_local(&self, local: DVec3) -> DMat3 {
        let g = self.local_to_geodetic(local);
        let (east, north, up) = enu_basis_ecef(g.lat_deg, g.lon_deg);
        DMat3::from_cols(
            self.ecef_to_enu * east,
            self.ecef_to_enu * north,
            self.ecef_to_enu * up,
        )
    }
}
