//! Collaborators supplied by the host application.
//!
//! The capture pipeline never talks to a renderer, physics engine or
//! planetary library directly; it goes through these traits. Reference
//! implementations live in [`crate::georef`] and [`crate::raster`].

use crate::config::GeometryDescriptor;
use crate::pool::BatchId;
use crate::projector::GeoPoint;
use crate::transform::Transform;
use glam::{DMat3, DVec3};

/// Conversion between engine world space and geodetic coordinates.
pub trait CoordinateTransform: Send + Sync {
    fn world_to_geodetic(&self, world: DVec3) -> GeoPoint;

    fn geodetic_to_world(&self, geo: GeoPoint) -> DVec3;

    /// East, north and up unit vectors at `world`, as matrix columns.
    fn east_north_up_frame(&self, world: DVec3) -> DMat3;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub position: DVec3,
    pub normal: DVec3,
}

/// Collision geometry the reprojected points can be snapped onto.
pub trait SurfaceQuery: Send + Sync {
    /// Traces from `origin + up * max_distance` to `origin - up * max_distance`
    /// and returns the first blocking hit.
    fn raycast_down(&self, origin: DVec3, up: DVec3, max_distance: f64) -> Option<SurfaceHit>;
}

/// Uniform random numbers for the stochastic placement.
pub trait RandomSource {
    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// Uniform in `[min, max)`.
    fn range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.unit()
    }
}

impl<R: rand::Rng + ?Sized> RandomSource for R {
    #[inline]
    fn unit(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// Observer for everything that changes the rendered instance set.
///
/// Transforms are relative to the capture anchor. All hooks run on the
/// thread that drives [`crate::FoliageCapture::tick`].
#[allow(unused_variables)]
pub trait InstanceSink: Send {
    fn batch_created(&mut self, batch: BatchId, descriptor: &GeometryDescriptor) {}

    fn batch_destroyed(&mut self, batch: BatchId) {}

    fn instances_cleared(&mut self, batch: BatchId) {}

    fn instances_added(&mut self, batch: BatchId, transforms: &[Transform]) {}

    /// Every live instance of `batch` was rewritten in place.
    fn instances_updated(&mut self, batch: BatchId, transforms: &[Transform]) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl InstanceSink for NullSink {}
