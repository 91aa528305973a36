//! Bookkeeping for moving the capture anchor and for world-origin rebases.

use crate::host::CoordinateTransform;
use crate::projector::GeoPoint;
use crate::transform::Transform;
use glam::DVec3;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
pub struct RecenterTracker {
    /// Non-zero only while a rebase is in progress; read by capture workers.
    world_offset: Arc<RwLock<DVec3>>,
    rebasing_enabled: bool,
    actor_offset: DVec3,
    pending_new_center: Option<GeoPoint>,
    waiting: bool,
    cleared_acknowledged: bool,
}

impl RecenterTracker {
    pub fn new(rebasing_enabled: bool) -> Self {
        Self {
            world_offset: Arc::new(RwLock::new(DVec3::ZERO)),
            rebasing_enabled,
            actor_offset: DVec3::ZERO,
            pending_new_center: None,
            waiting: false,
            cleared_acknowledged: false,
        }
    }

    pub fn world_offset_handle(&self) -> Arc<RwLock<DVec3>> {
        self.world_offset.clone()
    }

    pub fn world_offset(&self) -> DVec3 {
        *self.world_offset.read()
    }

    pub fn on_rebase_start(&self, old_origin: DVec3, new_origin: DVec3) {
        if self.rebasing_enabled {
            *self.world_offset.write() = new_origin - old_origin;
        }
    }

    pub fn on_rebase_end(&self) {
        *self.world_offset.write() = DVec3::ZERO;
    }

    /// Last relocation applied to the anchor.
    pub fn actor_offset(&self) -> DVec3 {
        self.actor_offset
    }

    pub fn pending_new_center(&self) -> Option<GeoPoint> {
        self.pending_new_center
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn begin(&mut self, center: GeoPoint) {
        self.pending_new_center = Some(center);
        self.waiting = true;
        self.cleared_acknowledged = false;
    }

    /// True once per re-centre, the first time the pool is seen fully cleared.
    pub fn should_acknowledge(&self, all_clear: bool) -> bool {
        all_clear && self.waiting && !self.cleared_acknowledged
    }

    /// Moves `anchor` onto the pending centre at `elevation`. Returns the
    /// anchor's displacement, or `None` if no re-centre was pending.
    pub fn complete(
        &mut self,
        anchor: &mut Transform,
        coordinates: &dyn CoordinateTransform,
        elevation: f64,
    ) -> Option<DVec3> {
        self.cleared_acknowledged = true;
        let center = self.pending_new_center.take()?;

        let target = coordinates.geodetic_to_world(GeoPoint {
            height: elevation,
            ..center
        });
        self.actor_offset = target - anchor.translation;
        anchor.translation = target;
        self.waiting = false;
        Some(self.actor_offset)
    }
}
