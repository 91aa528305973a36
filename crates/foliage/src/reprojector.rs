//! Turns a pair of capture rasters into per-batch instance transforms.
//!
//! Runs on a worker. Projection of pixels into the world is pure and fans out
//! over rayon; the stochastic part walks the projected pixels in row-major
//! order so a seeded random source always yields the same placement.

use crate::config::{ClassificationType, GeometryDescriptor};
use crate::error::{FoliageError, Result};
use crate::host::{CoordinateTransform, RandomSource, SurfaceQuery};
use crate::pool::{BatchId, BatchLayout};
use crate::projector::{self, CaptureExtents};
use crate::raster::LinearColor;
use crate::transform::{rotation_from_frame, rotation_from_z, Transform};
use glam::{DMat3, DQuat, DVec3};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprojectionStats {
    pub pixels: usize,
    /// Pixels whose colour matched at least one classification.
    pub matched: usize,
    pub generated: usize,
    /// Transforms dropped because their rotation was not normalized.
    pub degenerate_dropped: usize,
    /// Instances that had no batch to go to.
    pub missing_target: usize,
}

#[derive(Debug, Default)]
pub struct ReprojectionOutput {
    pub transforms: BTreeMap<BatchId, Vec<Transform>>,
    pub stats: ReprojectionStats,
}

/// A pixel projected into the world.
struct ProjectedPixel {
    color: LinearColor,
    normal: DVec3,
    position: DVec3,
    frame: DMat3,
}

/// Everything one cycle needs, captured on the main thread before dispatch.
pub struct Reprojector {
    pub classifications: Arc<Vec<ClassificationType>>,
    pub layout: BatchLayout,
    pub coordinates: Arc<dyn CoordinateTransform>,
    pub surface: Option<Arc<dyn SurfaceQuery>>,
    pub extents: CaptureExtents,
    /// Rebase offset sampled when processing starts.
    pub world_offset: DVec3,
    /// Capture anchor; stored transforms are relative to it.
    pub anchor: Transform,
    pub raycast_half_length: f64,
}

impl Reprojector {
    pub fn process<R: RandomSource + ?Sized>(
        &self,
        classification: &[LinearColor],
        normal_depth: &[LinearColor],
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<ReprojectionOutput> {
        let total = width as usize * height as usize;
        if total == 0 {
            return Err(FoliageError::invalid("capture rasters are empty"));
        }
        if classification.len() < total || normal_depth.len() < total {
            return Err(FoliageError::invalid(format!(
                "raster buffers hold {} and {} pixels, expected {total}",
                classification.len(),
                normal_depth.len()
            )));
        }

        let projected = self.project_pixels(classification, normal_depth, width, height)?;

        let mut output = ReprojectionOutput {
            stats: ReprojectionStats {
                pixels: total,
                matched: projected.len(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut assignment: HashMap<BatchId, usize> = HashMap::new();
        let mut reported: HashSet<&GeometryDescriptor> = HashSet::new();

        for pixel in &projected {
            for class in self.classifications.iter().filter(|c| c.color == pixel.color) {
                let (location, normal) = self.correct(pixel, class);
                for descriptor in &class.geometries {
                    let Some(transform) = self.sample(descriptor, location, normal, pixel.frame, rng)
                    else {
                        continue;
                    };

                    let Some(target) = self.layout.select_target(descriptor, &assignment) else {
                        output.stats.missing_target += 1;
                        if reported.insert(descriptor) {
                            tracing::error!(
                                classification = %class.label,
                                mesh = ?descriptor.mesh,
                                "No batch registered for geometry"
                            );
                        }
                        continue;
                    };

                    let relative = transform.relative_to(&self.anchor);
                    if !relative.is_rotation_normalized() {
                        output.stats.degenerate_dropped += 1;
                        continue;
                    }

                    *assignment.entry(target).or_insert(0) += 1;
                    output.transforms.entry(target).or_default().push(relative);
                    output.stats.generated += 1;
                }
            }
        }

        Ok(output)
    }

    /// Pixels that match some classification, in row-major order.
    fn project_pixels(
        &self,
        classification: &[LinearColor],
        normal_depth: &[LinearColor],
        width: u32,
        height: u32,
    ) -> Result<Vec<ProjectedPixel>> {
        let total = width as usize * height as usize;
        let classes = &self.classifications;

        (0..total)
            .into_par_iter()
            .filter(|&i| classes.iter().any(|c| c.color == classification[i]))
            .map(|i| {
                let x = (i % width as usize) as f64;
                let y = (i / width as usize) as f64;
                let nd = normal_depth[i];
                let elevation = projector::decode_elevation(nd.a as f64, self.extents.elevation);
                let geo = projector::pixel_to_geographic(x, y, elevation, width, height, &self.extents)?;
                let position = self.coordinates.geodetic_to_world(geo);
                Ok(ProjectedPixel {
                    color: classification[i],
                    normal: DVec3::new(nd.r as f64, nd.g as f64, nd.b as f64),
                    position,
                    frame: self.coordinates.east_north_up_frame(position),
                })
            })
            .collect()
    }

    /// Snaps onto the surface when the classification asks for it; a miss
    /// keeps the projected values.
    fn correct(&self, pixel: &ProjectedPixel, class: &ClassificationType) -> (DVec3, DVec3) {
        if class.align_to_surface_with_raycast {
            if let Some(surface) = &self.surface {
                let up = pixel.frame.z_axis;
                if let Some(hit) = surface.raycast_down(pixel.position, up, self.raycast_half_length) {
                    return (hit.position, hit.normal);
                }
            }
        }
        (pixel.position, pixel.normal)
    }

    /// Draws density, scale, yaw and z-offset, in that order. `None` when the
    /// density roll fails.
    fn sample<R: RandomSource + ?Sized>(
        &self,
        descriptor: &GeometryDescriptor,
        location: DVec3,
        normal: DVec3,
        frame: DMat3,
        rng: &mut R,
    ) -> Option<Transform> {
        if rng.unit() >= descriptor.density {
            return None;
        }

        let scale = descriptor.scale.interpolate(rng.unit());
        let mut rotation = if descriptor.align_to_normal {
            rotation_from_z(normal)
        } else {
            rotation_from_frame(frame)
        };
        if descriptor.random_yaw {
            let up = rotation * DVec3::Z;
            let yaw = rng.range(0.0, 360.0).to_radians();
            rotation = DQuat::from_axis_angle(up.normalize(), yaw) * rotation;
        }

        let up = rotation * DVec3::Z;
        let z_offset = descriptor.z_offset.interpolate(rng.unit());
        let position = location + self.world_offset + up * z_offset;
        Some(Transform::new(position, rotation, DVec3::splat(scale)))
    }
}
