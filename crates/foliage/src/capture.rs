//! One capture cycle: validate, read back, reproject on a worker, commit.
//!
//! ```text
//! Idle -> Extracting -> Processing -> Committing -> Idle
//! ```
//!
//! The phase lives behind a lock because the readback and worker threads
//! advance it; everything else about the cycle is owned by the main thread.
//! A failed readback drops straight back to `Idle`; its report still arrives
//! through [`CaptureController::poll`].

use crate::config::ClassificationType;
use crate::error::{FoliageError, Result};
use crate::host::{CoordinateTransform, SurfaceQuery};
use crate::pool::{BatchLayout, BatchPool};
use crate::projector::{CaptureExtents, WorldBounds};
use crate::raster::{LinearColor, RasterReadback, RenderTarget};
use crate::reprojector::{ReprojectionOutput, ReprojectionStats, Reprojector};
use crate::transform::Transform;
use glam::DVec3;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type CycleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    Extracting,
    Processing,
    Committing,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(ReprojectionOutput),
    Failed(String),
}

/// Sent from the worker to the main thread once per cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: CycleId,
    pub outcome: CycleOutcome,
}

/// What the main thread did with a [`CycleReport`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Committed {
        cycle: CycleId,
        batches: usize,
        instances: usize,
        /// Instances whose batch was destroyed while the cycle ran.
        dropped: usize,
        stats: ReprojectionStats,
    },
    Failed {
        cycle: CycleId,
        reason: String,
    },
}

/// Inputs for one cycle, gathered by the caller on the main thread.
pub struct CaptureRequest {
    pub distribution: Arc<dyn RenderTarget>,
    pub normal_depth: Arc<dyn RenderTarget>,
    pub bounds: WorldBounds,
    pub coordinates: Option<Arc<dyn CoordinateTransform>>,
    pub surface: Option<Arc<dyn SurfaceQuery>>,
    pub classifications: Arc<Vec<ClassificationType>>,
    pub layout: BatchLayout,
    pub anchor: Transform,
    pub capture_elevation: f64,
    pub raycast_half_length: f64,
}

pub struct CaptureController {
    phase: Arc<RwLock<CapturePhase>>,
    world_offset: Arc<RwLock<DVec3>>,
    current: CycleId,
    next_cycle: CycleId,
    seeds: StdRng,
    results_tx: mpsc::UnboundedSender<CycleReport>,
    results_rx: mpsc::UnboundedReceiver<CycleReport>,
}

impl CaptureController {
    /// `world_offset` is read by the worker when processing starts.
    pub fn new(world_offset: Arc<RwLock<DVec3>>, seed: Option<u64>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            phase: Arc::new(RwLock::new(CapturePhase::Idle)),
            world_offset,
            current: 0,
            next_cycle: 1,
            seeds: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            results_tx,
            results_rx,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        *self.phase.read()
    }

    pub fn is_building(&self) -> bool {
        self.phase() != CapturePhase::Idle
    }

    /// Starts a cycle. Rejected requests leave the controller untouched.
    pub fn start(
        &mut self,
        request: CaptureRequest,
        readback: &dyn RasterReadback,
    ) -> Result<CycleId> {
        if self.is_building() {
            return Err(FoliageError::CaptureInProgress(self.current));
        }
        let coordinates = request
            .coordinates
            .ok_or_else(|| FoliageError::invalid("no coordinate transform attached"))?;

        let size = request.distribution.size();
        if size.0 == 0 || size.1 == 0 {
            return Err(FoliageError::invalid(format!(
                "distribution map is {}x{}",
                size.0, size.1
            )));
        }
        if request.normal_depth.size() != size {
            let nd = request.normal_depth.size();
            return Err(FoliageError::invalid(format!(
                "normal/depth map is {}x{}, distribution map is {}x{}",
                nd.0, nd.1, size.0, size.1
            )));
        }
        if request.classifications.is_empty() {
            return Err(FoliageError::invalid("no classifications configured"));
        }

        let extents = CaptureExtents::from_world_bounds(
            &request.bounds,
            coordinates.as_ref(),
            request.capture_elevation,
        );

        let cycle = self.next_cycle;
        self.next_cycle += 1;
        self.current = cycle;
        *self.phase.write() = CapturePhase::Extracting;

        let reprojector = Reprojector {
            classifications: request.classifications,
            layout: request.layout,
            coordinates,
            surface: request.surface,
            extents,
            world_offset: DVec3::ZERO,
            anchor: request.anchor,
            raycast_half_length: request.raycast_half_length,
        };
        let job = CycleJob {
            cycle,
            seed: self.seeds.gen(),
            width: size.0,
            height: size.1,
            reprojector,
            phase: self.phase.clone(),
            world_offset: self.world_offset.clone(),
            results: self.results_tx.clone(),
        };

        tracing::info!(cycle, width = size.0, height = size.1, extents = ?extents, "Capture cycle started");
        readback.read_async(
            vec![request.distribution, request.normal_depth],
            Box::new(move |success, buffers| job.run(success, buffers)),
        );
        Ok(cycle)
    }

    /// Next finished cycle, if any. Never blocks.
    pub fn poll(&mut self) -> Option<CycleReport> {
        self.results_rx.try_recv().ok()
    }

    /// Queues a finished cycle's transforms on their batches and returns to
    /// idle. With `replace` every receiving batch drops its live instances
    /// when the add is flushed.
    pub fn complete(
        &mut self,
        report: CycleReport,
        pool: &mut BatchPool,
        replace: bool,
    ) -> CycleResult {
        let cycle = report.cycle;
        let result = match report.outcome {
            CycleOutcome::Completed(output) => {
                *self.phase.write() = CapturePhase::Committing;
                let stats = output.stats;
                let (mut batches, mut instances, mut dropped) = (0, 0, 0);

                for (id, transforms) in output.transforms {
                    let n = transforms.len();
                    let queued = if replace {
                        pool.replace_pending(id, transforms)
                    } else {
                        pool.apply_pending(id, transforms)
                    };
                    match queued {
                        Ok(()) => {
                            batches += 1;
                            instances += n;
                        }
                        Err(err) => {
                            tracing::warn!(cycle, error = %err, instances = n, "Dropping results for destroyed batch");
                            dropped += n;
                        }
                    }
                }

                tracing::info!(cycle, batches, instances, dropped, "Capture cycle committed");
                CycleResult::Committed {
                    cycle,
                    batches,
                    instances,
                    dropped,
                    stats,
                }
            }
            CycleOutcome::Failed(reason) => {
                tracing::warn!(cycle, %reason, "Capture cycle failed");
                CycleResult::Failed { cycle, reason }
            }
        };
        // A failed cycle may already have been superseded by a newer one.
        if cycle == self.current {
            *self.phase.write() = CapturePhase::Idle;
        }
        result
    }
}

/// The part of a cycle that leaves the main thread.
struct CycleJob {
    cycle: CycleId,
    seed: u64,
    width: u32,
    height: u32,
    reprojector: Reprojector,
    phase: Arc<RwLock<CapturePhase>>,
    world_offset: Arc<RwLock<DVec3>>,
    results: mpsc::UnboundedSender<CycleReport>,
}

impl CycleJob {
    fn run(mut self, success: bool, buffers: Vec<Vec<LinearColor>>) {
        let outcome = match (success, buffers.as_slice()) {
            (true, [classification, normal_depth, ..]) => {
                *self.phase.write() = CapturePhase::Processing;
                self.reprojector.world_offset = *self.world_offset.read();
                let mut rng = StdRng::seed_from_u64(self.seed);
                match self.reprojector.process(
                    classification,
                    normal_depth,
                    self.width,
                    self.height,
                    &mut rng,
                ) {
                    Ok(output) => CycleOutcome::Completed(output),
                    Err(err) => CycleOutcome::Failed(err.to_string()),
                }
            }
            _ => {
                *self.phase.write() = CapturePhase::Idle;
                CycleOutcome::Failed(FoliageError::ReadbackFailed.to_string())
            }
        };

        if self
            .results
            .send(CycleReport {
                cycle: self.cycle,
                outcome,
            })
            .is_err()
        {
            tracing::debug!(cycle = self.cycle, "Capture controller dropped before cycle finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeometryDescriptor;
    use crate::georef::PlanarGeoreference;
    use crate::raster::{ImageTarget, InlineReadback, ReadbackCallback};
    use parking_lot::Mutex;

    const GREEN: LinearColor = LinearColor::new(0.0, 1.0, 0.0, 1.0);

    /// Holds on to the callback so the cycle stays in flight.
    #[derive(Default)]
    struct StalledReadback(Mutex<Vec<ReadbackCallback>>);

    impl RasterReadback for StalledReadback {
        fn read_async(&self, _targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback) {
            self.0.lock().push(callback);
        }
    }

    struct FailingReadback;

    impl RasterReadback for FailingReadback {
        fn read_async(&self, _targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback) {
            callback(false, Vec::new());
        }
    }

    fn classes() -> Arc<Vec<ClassificationType>> {
        Arc::new(vec![ClassificationType {
            label: "forest".into(),
            color: GREEN,
            pooled_batches_per_geometry: 1,
            geometries: vec![GeometryDescriptor {
                density: 1.0,
                ..GeometryDescriptor::with_mesh("pine")
            }],
            ..Default::default()
        }])
    }

    fn request(pool: &BatchPool, size: (u32, u32)) -> CaptureRequest {
        let classification = ImageTarget::new(size.0, size.1);
        classification.write(&vec![GREEN; (size.0 * size.1) as usize]);
        CaptureRequest {
            distribution: Arc::new(classification),
            normal_depth: Arc::new(ImageTarget::new(size.0, size.1)),
            bounds: WorldBounds::new(DVec3::ZERO, DVec3::new(100.0, 100.0, 0.0)),
            coordinates: Some(Arc::new(PlanarGeoreference::new(100.0))),
            surface: None,
            classifications: classes(),
            layout: pool.snapshot(),
            anchor: Transform::IDENTITY,
            capture_elevation: 1024.0,
            raycast_half_length: 60.0,
        }
    }

    fn controller() -> (CaptureController, BatchPool) {
        let mut pool = BatchPool::new();
        pool.rebuild(&classes());
        (
            CaptureController::new(Arc::new(RwLock::new(DVec3::ZERO)), Some(11)),
            pool,
        )
    }

    #[test]
    fn inline_cycle_commits_on_the_main_thread() {
        let (mut controller, mut pool) = controller();
        let cycle = controller.start(request(&pool, (2, 2)), &InlineReadback).unwrap();
        assert_eq!(controller.phase(), CapturePhase::Processing);

        let report = controller.poll().unwrap();
        assert_eq!(report.cycle, cycle);
        let result = controller.complete(report, &mut pool, false);
        assert!(matches!(
            result,
            CycleResult::Committed {
                batches: 1,
                instances: 4,
                dropped: 0,
                ..
            }
        ));
        assert!(!controller.is_building());
        assert!(!pool.all_clear());
    }

    #[test]
    fn second_request_while_building_is_rejected() {
        let (mut controller, pool) = controller();
        let readback = StalledReadback::default();
        let cycle = controller.start(request(&pool, (2, 2)), &readback).unwrap();

        let again = controller.start(request(&pool, (2, 2)), &readback);
        assert!(matches!(again, Err(FoliageError::CaptureInProgress(c)) if c == cycle));
        assert_eq!(readback.0.lock().len(), 1);
        assert_eq!(controller.phase(), CapturePhase::Extracting);
    }

    #[test]
    fn invalid_requests_change_nothing() {
        let (mut controller, pool) = controller();

        let mut no_coords = request(&pool, (2, 2));
        no_coords.coordinates = None;
        assert!(controller.start(no_coords, &InlineReadback).is_err());

        let mut mismatched = request(&pool, (2, 2));
        mismatched.normal_depth = Arc::new(ImageTarget::new(3, 2));
        assert!(controller.start(mismatched, &InlineReadback).is_err());

        let mut empty = request(&pool, (2, 2));
        empty.classifications = Arc::new(Vec::new());
        assert!(controller.start(empty, &InlineReadback).is_err());

        assert!(controller.start(request(&pool, (0, 0)), &InlineReadback).is_err());
        assert_eq!(controller.phase(), CapturePhase::Idle);
        assert!(controller.poll().is_none());
    }

    #[test]
    fn readback_failure_reports_failed_cycle() {
        let (mut controller, mut pool) = controller();
        let cycle = controller.start(request(&pool, (2, 2)), &FailingReadback).unwrap();
        assert!(!controller.is_building());
        let report = controller.poll().unwrap();
        let result = controller.complete(report, &mut pool, false);
        assert!(matches!(result, CycleResult::Failed { cycle: c, .. } if c == cycle));
        assert!(pool.all_clear());
        assert!(!controller.is_building());
    }

    #[test]
    fn late_failure_report_leaves_newer_cycle_building() {
        let (mut controller, mut pool) = controller();
        let failed = controller.start(request(&pool, (2, 2)), &FailingReadback).unwrap();
        let stalled = StalledReadback::default();
        let next = controller.start(request(&pool, (2, 2)), &stalled).unwrap();
        assert_ne!(failed, next);

        let report = controller.poll().unwrap();
        assert_eq!(report.cycle, failed);
        let result = controller.complete(report, &mut pool, false);
        assert!(matches!(result, CycleResult::Failed { .. }));
        assert_eq!(controller.phase(), CapturePhase::Extracting);
        assert!(controller.is_building());
    }

    #[test]
    fn results_for_rebuilt_batches_are_dropped() {
        let (mut controller, mut pool) = controller();
        controller.start(request(&pool, (2, 2)), &InlineReadback).unwrap();
        pool.rebuild(&classes());

        let report = controller.poll().unwrap();
        let result = controller.complete(report, &mut pool, false);
        assert!(matches!(
            result,
            CycleResult::Committed {
                batches: 0,
                instances: 0,
                dropped: 4,
                ..
            }
        ));
        assert!(pool.all_clear());
    }

    #[test]
    fn world_offset_is_sampled_when_processing_starts() {
        let offset = Arc::new(RwLock::new(DVec3::ZERO));
        let mut controller = CaptureController::new(offset.clone(), Some(5));
        let mut pool = BatchPool::new();
        pool.rebuild(&classes());

        let readback = StalledReadback::default();
        controller.start(request(&pool, (1, 1)), &readback).unwrap();
        *offset.write() = DVec3::new(0.0, 0.0, 250.0);

        let callback = readback.0.lock().pop().unwrap();
        callback(true, vec![vec![GREEN], vec![LinearColor::new(0.0, 0.0, 1.0, 1.0)]]);

        let report = controller.poll().unwrap();
        let CycleOutcome::Completed(output) = &report.outcome else {
            panic!("cycle failed: {:?}", report.outcome);
        };
        let t = output.transforms.values().next().unwrap()[0];
        assert_eq!(t.translation.z, 1024.0 + 250.0);
    }
}
