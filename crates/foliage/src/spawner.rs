use crate::applier::{Applier, ApplierPass};
use crate::capture::{CaptureController, CaptureRequest, CycleId, CycleResult};
use crate::config::{ClassificationType, FoliageConfig, FoliageSettings, RecenterStrategy};
use crate::error::{FoliageError, Result};
use crate::host::{CoordinateTransform, InstanceSink, NullSink, SurfaceQuery};
use crate::pool::BatchPool;
use crate::projector::{geographic_distance, GeoPoint, WorldBounds};
use crate::raster::{RasterReadback, RenderTarget};
use crate::recenter::RecenterTracker;
use crate::transform::{rotation_from_frame, Transform};
use glam::DVec3;
use std::sync::Arc;

/// Notifications for the host, drained with [`FoliageCapture::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum FoliageEvent {
    CaptureCommitted {
        cycle: CycleId,
        batches: usize,
        instances: usize,
        dropped: usize,
    },
    CaptureFailed {
        cycle: CycleId,
        reason: String,
    },
    /// The anchor moved; the host should render new rasters and request a
    /// capture.
    InstancesCleared { actor_offset: DVec3 },
}

/// Main-thread owner of the whole foliage pipeline.
pub struct FoliageCapture {
    settings: FoliageSettings,
    classifications: Arc<Vec<ClassificationType>>,
    pool: BatchPool,
    controller: CaptureController,
    applier: Applier,
    recenter: RecenterTracker,
    /// Every stored instance transform is relative to this.
    anchor: Transform,
    capture_width_in_degrees: f64,
    coordinates: Option<Arc<dyn CoordinateTransform>>,
    surface: Option<Arc<dyn SurfaceQuery>>,
    readback: Arc<dyn RasterReadback>,
    sink: Box<dyn InstanceSink>,
    events: Vec<FoliageEvent>,
}

impl FoliageCapture {
    pub fn new(config: FoliageConfig, readback: Arc<dyn RasterReadback>) -> Self {
        let FoliageConfig {
            settings,
            classifications,
        } = config;
        let recenter = RecenterTracker::new(settings.rebasing_enabled);
        let controller =
            CaptureController::new(recenter.world_offset_handle(), settings.random_seed);
        let applier = Applier::new(
            settings.update_foliage_after_num_frames,
            settings.max_components_to_update_per_frame,
        );

        let mut capture = Self {
            settings,
            classifications: Arc::new(classifications),
            pool: BatchPool::new(),
            controller,
            applier,
            recenter,
            anchor: Transform::IDENTITY,
            capture_width_in_degrees: 0.01,
            coordinates: None,
            surface: None,
            readback,
            sink: Box::new(NullSink),
            events: Vec::new(),
        };
        capture.rebuild_batches();
        capture
    }

    pub fn with_coordinates(mut self, coordinates: Arc<dyn CoordinateTransform>) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_surface(mut self, surface: Arc<dyn SurfaceQuery>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Installs `sink` and announces every existing batch to it.
    pub fn with_sink(mut self, sink: Box<dyn InstanceSink>) -> Self {
        self.sink = sink;
        for batch in self.pool.batches() {
            self.sink.batch_created(batch.id(), batch.descriptor());
        }
        self
    }

    pub fn with_anchor(mut self, anchor: Transform) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn settings(&self) -> &FoliageSettings {
        &self.settings
    }

    pub fn classifications(&self) -> &[ClassificationType] {
        &self.classifications
    }

    pub fn pool(&self) -> &BatchPool {
        &self.pool
    }

    pub fn anchor(&self) -> &Transform {
        &self.anchor
    }

    pub fn recenter(&self) -> &RecenterTracker {
        &self.recenter
    }

    pub fn coordinates(&self) -> Option<&Arc<dyn CoordinateTransform>> {
        self.coordinates.as_ref()
    }

    pub fn capture_width_in_degrees(&self) -> f64 {
        self.capture_width_in_degrees
    }

    pub fn instance_count(&self) -> usize {
        self.pool.instance_count()
    }

    pub fn is_building(&self) -> bool {
        self.controller.is_building()
    }

    pub fn is_waiting(&self) -> bool {
        self.recenter.is_waiting()
    }

    /// World-space volume the overhead capture should cover, centred on the
    /// anchor and aligned with its east/north axes.
    pub fn capture_bounds(&self) -> WorldBounds {
        let half = self.settings.covered_width() / 2.0;
        WorldBounds::new(
            self.anchor.transform_point(DVec3::new(-half, -half, 0.0)),
            self.anchor.transform_point(DVec3::new(half, half, 0.0)),
        )
    }

    /// Starts a capture cycle from the two rendered rasters. Requests made
    /// while a cycle is in flight, or with missing inputs, are logged and
    /// returned as errors without side effects.
    pub fn request_capture(
        &mut self,
        distribution: Arc<dyn RenderTarget>,
        normal_depth: Arc<dyn RenderTarget>,
        bounds: WorldBounds,
    ) -> Result<CycleId> {
        let request = CaptureRequest {
            distribution,
            normal_depth,
            bounds,
            coordinates: self.coordinates.clone(),
            surface: self.surface.clone(),
            classifications: self.classifications.clone(),
            layout: self.pool.snapshot(),
            anchor: self.anchor,
            capture_elevation: self.settings.capture_elevation,
            raycast_half_length: self.settings.raycast_half_length,
        };
        match self.controller.start(request, self.readback.as_ref()) {
            Ok(cycle) => Ok(cycle),
            Err(err @ FoliageError::CaptureInProgress(_)) => {
                tracing::debug!(error = %err, "Ignoring capture request");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Rejected capture request");
                Err(err)
            }
        }
    }

    /// Empties every batch over the next applier passes.
    pub fn clear_foliage_instances(&mut self) {
        self.pool.mark_all_for_clear();
    }

    /// Replaces the classification set and rebuilds the pool. Results of a
    /// cycle already in flight are dropped at commit.
    pub fn set_classifications(&mut self, classifications: Vec<ClassificationType>) {
        self.classifications = Arc::new(classifications);
        self.rebuild_batches();
    }

    pub fn rebuild_batches(&mut self) {
        for batch in self.pool.batches() {
            self.sink.batch_destroyed(batch.id());
        }
        self.pool.rebuild(&self.classifications);
        for batch in self.pool.batches() {
            self.sink.batch_created(batch.id(), batch.descriptor());
        }
        tracing::info!(
            classifications = self.classifications.len(),
            batches = self.pool.len(),
            "Rebuilt foliage batches"
        );
    }

    /// Re-centres the capture on `new_center` (world space). The anchor is
    /// turned to face the surface there immediately and moved once the old
    /// instances are gone.
    pub fn on_update(&mut self, new_center: DVec3) -> Result<()> {
        let coordinates = self
            .coordinates
            .clone()
            .ok_or_else(|| FoliageError::invalid("no coordinate transform attached"))?;

        let center = coordinates.world_to_geodetic(new_center);
        self.recenter.begin(center);
        self.anchor.rotation = rotation_from_frame(coordinates.east_north_up_frame(new_center));

        let half = self.settings.covered_width() / 2.0;
        let elevation = self.settings.capture_elevation;
        let at_elevation = |local: DVec3| GeoPoint {
            height: elevation,
            ..coordinates.world_to_geodetic(self.anchor.transform_point(local))
        };
        let start = at_elevation(DVec3::new(-half, 0.0, 0.0));
        let end = at_elevation(DVec3::new(half, 0.0, 0.0));
        self.capture_width_in_degrees = geographic_distance(start, end) / 2.0;

        tracing::info!(
            lon = center.lon,
            lat = center.lat,
            width_deg = self.capture_width_in_degrees,
            strategy = ?self.settings.recenter_strategy,
            "Re-centring foliage capture"
        );
        match self.settings.recenter_strategy {
            RecenterStrategy::Rebuild => self.clear_foliage_instances(),
            RecenterStrategy::OffsetInstances => self.on_instances_cleared(),
        }
        Ok(())
    }

    /// Finishes a re-centre: moves the anchor and tells the host to capture.
    pub fn on_instances_cleared(&mut self) {
        let Some(coordinates) = self.coordinates.clone() else {
            tracing::warn!("Instances cleared without a coordinate transform");
            return;
        };
        let previous_anchor = self.anchor;
        let Some(actor_offset) = self.recenter.complete(
            &mut self.anchor,
            coordinates.as_ref(),
            self.settings.capture_elevation,
        ) else {
            return;
        };

        if self.settings.recenter_strategy == RecenterStrategy::OffsetInstances {
            self.pool
                .offset_all_instances(actor_offset, &previous_anchor, &self.anchor);
            for batch in self.pool.batches() {
                self.sink.instances_updated(batch.id(), batch.instances());
            }
        }
        tracing::info!(offset = ?actor_offset, "Capture anchor relocated");
        self.events.push(FoliageEvent::InstancesCleared { actor_offset });
    }

    pub fn on_rebase_start(&self, old_origin: DVec3, new_origin: DVec3) {
        self.recenter.on_rebase_start(old_origin, new_origin);
    }

    pub fn on_rebase_end(&self) {
        self.recenter.on_rebase_end();
    }

    /// Follows a world-origin shift. Instances are anchor-relative and move
    /// with it.
    pub fn translate_anchor(&mut self, delta: DVec3) {
        self.anchor.translation += delta;
    }

    /// Per-frame driver: commits finished cycles, runs the applier and
    /// acknowledges a completed clear.
    pub fn tick(&mut self) -> Option<ApplierPass> {
        let replace = self.settings.recenter_strategy == RecenterStrategy::OffsetInstances;
        while let Some(report) = self.controller.poll() {
            let event = match self.controller.complete(report, &mut self.pool, replace) {
                CycleResult::Committed {
                    cycle,
                    batches,
                    instances,
                    dropped,
                    ..
                } => FoliageEvent::CaptureCommitted {
                    cycle,
                    batches,
                    instances,
                    dropped,
                },
                CycleResult::Failed { cycle, reason } => {
                    FoliageEvent::CaptureFailed { cycle, reason }
                }
            };
            self.events.push(event);
        }

        let pass = self.applier.tick(
            &mut self.pool,
            self.controller.is_building(),
            self.sink.as_mut(),
        )?;
        if self.recenter.should_acknowledge(self.pool.all_clear()) {
            self.on_instances_cleared();
        }
        Some(pass)
    }

    pub fn drain_events(&mut self) -> Vec<FoliageEvent> {
        std::mem::take(&mut self.events)
    }
}
