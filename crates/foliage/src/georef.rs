//! [`CoordinateTransform`] implementations.

use crate::host::CoordinateTransform;
use crate::projector::GeoPoint;
use geodesy::{Geodetic, Georeference};
use glam::{DMat3, DVec3};
use parking_lot::RwLock;
use std::sync::Arc;

fn to_geodetic(geo: GeoPoint) -> Geodetic {
    Geodetic::new(geo.lat, geo.lon, geo.height)
}

fn from_geodetic(g: Geodetic) -> GeoPoint {
    GeoPoint::new(g.lon_deg, g.lat_deg, g.height_m)
}

impl CoordinateTransform for Georeference {
    fn world_to_geodetic(&self, world: DVec3) -> GeoPoint {
        from_geodetic(self.local_to_geodetic(world))
    }

    fn geodetic_to_world(&self, geo: GeoPoint) -> DVec3 {
        self.geodetic_to_local(to_geodetic(geo))
    }

    fn east_north_up_frame(&self, world: DVec3) -> DMat3 {
        self.enu_at_local(world)
    }
}

/// A [`Georeference`] that can be rebased while workers hold it.
#[derive(Debug, Clone)]
pub struct SharedGeoreference(Arc<RwLock<Georeference>>);

impl SharedGeoreference {
    pub fn new(georef: Georeference) -> Self {
        Self(Arc::new(RwLock::new(georef)))
    }

    /// Moves the engine origin by `delta`.
    pub fn translate_origin(&self, delta: DVec3) {
        self.0.write().translate_origin(delta);
    }

    pub fn origin_shift(&self) -> DVec3 {
        self.0.read().origin_shift()
    }
}

impl CoordinateTransform for SharedGeoreference {
    fn world_to_geodetic(&self, world: DVec3) -> GeoPoint {
        self.0.read().world_to_geodetic(world)
    }

    fn geodetic_to_world(&self, geo: GeoPoint) -> DVec3 {
        self.0.read().geodetic_to_world(geo)
    }

    fn east_north_up_frame(&self, world: DVec3) -> DMat3 {
        self.0.read().east_north_up_frame(world)
    }
}

/// Flat-earth mapping: x = lon * scale, y = lat * scale, z = height, with an
/// identity ENU frame everywhere.
#[derive(Debug, Clone, Copy)]
pub struct PlanarGeoreference {
    pub meters_per_degree: f64,
}

impl PlanarGeoreference {
    pub fn new(meters_per_degree: f64) -> Self {
        Self { meters_per_degree }
    }
}

impl CoordinateTransform for PlanarGeoreference {
    fn world_to_geodetic(&self, world: DVec3) -> GeoPoint {
        GeoPoint::new(
            world.x / self.meters_per_degree,
            world.y / self.meters_per_degree,
            world.z,
        )
    }

    fn geodetic_to_world(&self, geo: GeoPoint) -> DVec3 {
        DVec3::new(
            geo.lon * self.meters_per_degree,
            geo.lat * self.meters_per_degree,
            geo.height,
        )
    }

    fn east_north_up_frame(&self, _world: DVec3) -> DMat3 {
        DMat3::IDENTITY
    }
}
