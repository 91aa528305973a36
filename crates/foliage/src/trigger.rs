use crate::error::Result;
use crate::projector::{geographic_distance, GeoPoint};
use crate::spawner::FoliageCapture;
use glam::DVec3;

/// Where the viewer is this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerState {
    pub position: DVec3,
    /// Metres per second.
    pub speed: f64,
}

/// Decides when the capture should follow the viewer.
#[derive(Debug, Default)]
pub struct TriggerPolicy {
    has_spawned: bool,
}

impl TriggerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_spawned(&self) -> bool {
        self.has_spawned
    }

    /// Re-centres `capture` on the viewer when the viewer has left the
    /// captured area while low and slow enough, or when nothing has been
    /// spawned yet. Never fires while a cycle is in flight or a previous
    /// re-centre is still clearing. Returns whether a re-centre was started.
    pub fn tick(&mut self, viewer: &ViewerState, capture: &mut FoliageCapture) -> Result<bool> {
        if capture.is_building() || capture.is_waiting() {
            return Ok(false);
        }
        let Some(coordinates) = capture.coordinates().cloned() else {
            return Ok(false);
        };
        let settings = capture.settings();
        let elevation = settings.capture_elevation;

        let camera = coordinates.world_to_geodetic(viewer.position);
        let camera_at_capture = GeoPoint {
            height: elevation,
            ..camera
        };
        let anchor = coordinates.world_to_geodetic(capture.anchor().translation);
        let distance = geographic_distance(camera_at_capture, anchor);

        let outside = distance > capture.capture_width_in_degrees();
        let low_and_slow =
            camera.height <= elevation && viewer.speed < settings.speed_update_threshold;
        if !((outside && low_and_slow) || !self.has_spawned) {
            return Ok(false);
        }

        capture.on_update(coordinates.geodetic_to_world(camera_at_capture))?;
        self.has_spawned = true;
        Ok(true)
    }
}
