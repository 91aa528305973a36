use foliage::{CoordinateTransform, GeoPoint, ViewerState};
use geodesy::{enu_basis_ecef, Geodetic};
use std::time::Duration;

/// Constant-altitude, constant-heading camera flight.
#[derive(Debug, Clone)]
pub struct Flight {
    position: Geodetic,
    heading_deg: f64,
    speed: f64,
}

impl Flight {
    pub fn new(start: Geodetic, heading_deg: f64, speed: f64) -> Self {
        Self {
            position: start,
            heading_deg,
            speed,
        }
    }

    pub fn position(&self) -> Geodetic {
        self.position
    }

    /// Moves the camera `dt` along its heading in the local tangent plane,
    /// then drops it back to its altitude.
    pub fn advance(&mut self, dt: Duration) {
        let (east, north, _) = enu_basis_ecef(self.position.lat_deg, self.position.lon_deg);
        let (sin_h, cos_h) = self.heading_deg.to_radians().sin_cos();
        let step = (east * sin_h + north * cos_h) * self.speed * dt.as_secs_f64();

        let altitude = self.position.height_m;
        let mut next = Geodetic::from_ecef(self.position.to_ecef() + step);
        next.height_m = altitude;
        self.position = next;
    }

    pub fn viewer(&self, coordinates: &dyn CoordinateTransform) -> ViewerState {
        let p = self.position;
        ViewerState {
            position: coordinates.geodetic_to_world(GeoPoint::new(p.lon_deg, p.lat_deg, p.height_m)),
            speed: self.speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn northbound_flight_gains_latitude_only() {
        let mut flight = Flight::new(Geodetic::new(10.0, 20.0, 300.0), 0.0, 100.0);
        for _ in 0..60 {
            flight.advance(Duration::from_secs(1));
        }
        let p = flight.position();
        // 6 km north is a little over 0.054 degrees of latitude.
        assert!((p.lat_deg - 10.0 - 0.0543).abs() < 1e-3, "lat {}", p.lat_deg);
        assert!((p.lon_deg - 20.0).abs() < 1e-9);
        assert_eq!(p.height_m, 300.0);
    }
}
