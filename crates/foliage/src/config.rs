//! Foliage configuration: capture settings, classifications and the geometry
//! descriptors that key the batch pool.
//!
//! Everything here deserializes from JSON. Missing fields fall back to the
//! defaults documented on each type.

use crate::error::Result;
use crate::raster::LinearColor;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Closed interval sampled by linear interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatInterval {
    pub min: f64,
    pub max: f64,
}

impl FloatInterval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `min + (max - min) * alpha`; `alpha` is usually a uniform draw in [0, 1).
    #[inline]
    pub fn interpolate(&self, alpha: f64) -> f64 {
        self.min + (self.max - self.min) * alpha
    }
}

/// Reference to a renderable mesh asset, resolved by the host renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeshRef(pub String);

impl From<&str> for MeshRef {
    fn from(path: &str) -> Self {
        Self(path.to_owned())
    }
}

/// Placement rules and render settings for one foliage mesh.
///
/// Equality and hashing ignore `culling_distances`: two descriptors that only
/// differ in culling share the same batch group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryDescriptor {
    pub mesh: Option<MeshRef>,
    /// Probability in [0, 1] that a matching pixel spawns this geometry.
    pub density: f64,
    pub random_yaw: bool,
    pub scale: FloatInterval,
    /// Offset along the instance's up axis, in metres.
    pub z_offset: FloatInterval,
    pub align_to_normal: bool,
    pub collides_with_world: bool,
    pub culling_distances: FloatInterval,
    /// Expensive; may hitch when batches are updated.
    pub affects_distance_field_lighting: bool,
}

impl Default for GeometryDescriptor {
    fn default() -> Self {
        Self {
            mesh: None,
            density: 0.5,
            random_yaw: false,
            scale: FloatInterval::new(1.0, 1.0),
            z_offset: FloatInterval::new(0.0, 0.0),
            align_to_normal: false,
            collides_with_world: true,
            culling_distances: FloatInterval::new(40.96, 327.68),
            affects_distance_field_lighting: false,
        }
    }
}

impl GeometryDescriptor {
    pub fn with_mesh(mesh: impl Into<MeshRef>) -> Self {
        Self {
            mesh: Some(mesh.into()),
            ..Self::default()
        }
    }

    fn key_bits(&self) -> [u64; 5] {
        [
            self.density.to_bits(),
            self.scale.min.to_bits(),
            self.scale.max.to_bits(),
            self.z_offset.min.to_bits(),
            self.z_offset.max.to_bits(),
        ]
    }
}

impl PartialEq for GeometryDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.mesh == other.mesh
            && self.key_bits() == other.key_bits()
            && self.random_yaw == other.random_yaw
            && self.align_to_normal == other.align_to_normal
            && self.collides_with_world == other.collides_with_world
            && self.affects_distance_field_lighting == other.affects_distance_field_lighting
    }
}

impl Eq for GeometryDescriptor {}

impl Hash for GeometryDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mesh.hash(state);
        self.key_bits().hash(state);
        self.random_yaw.hash(state);
        self.align_to_normal.hash(state);
        self.collides_with_world.hash(state);
        self.affects_distance_field_lighting.hash(state);
    }
}

/// A classification colour and the geometries spawned where it appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationType {
    pub label: String,
    /// Compared for exact equality against classification pixels.
    pub color: LinearColor,
    /// Trace down from each reprojected point to snap onto collision geometry.
    pub align_to_surface_with_raycast: bool,
    pub pooled_batches_per_geometry: u32,
    pub geometries: Vec<GeometryDescriptor>,
}

impl Default for ClassificationType {
    fn default() -> Self {
        Self {
            label: String::new(),
            color: LinearColor::TRANSPARENT,
            align_to_surface_with_raycast: false,
            pooled_batches_per_geometry: 4,
            geometries: Vec::new(),
        }
    }
}

/// What happens to live instances once a re-centre has cleared them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecenterStrategy {
    /// Clear every batch, relocate the anchor, then capture again.
    #[default]
    Rebuild,
    /// Skip the clear and shift live instances by the anchor's offset.
    OffsetInstances,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoliageSettings {
    /// Height (metres above the ellipsoid) of the overhead capture.
    pub capture_elevation: f64,
    /// Orthographic width of the capture, in metres.
    pub capture_width: f64,
    pub update_foliage_after_num_frames: u32,
    pub max_components_to_update_per_frame: u32,
    /// Captures covered per side; 0 is treated as 1.
    pub grid_size: u32,
    /// When false the rebase offset stays at zero.
    pub rebasing_enabled: bool,
    /// The viewer must be slower than this for a re-centre to trigger.
    pub speed_update_threshold: f64,
    /// Half the length of the surface-correction trace, in metres.
    pub raycast_half_length: f64,
    pub recenter_strategy: RecenterStrategy,
    /// Fixed seed for reproducible placement; entropy when absent.
    pub random_seed: Option<u64>,
}

impl Default for FoliageSettings {
    fn default() -> Self {
        Self {
            capture_elevation: 1024.0,
            capture_width: 1310.72,
            update_foliage_after_num_frames: 2,
            max_components_to_update_per_frame: 1,
            grid_size: 0,
            rebasing_enabled: true,
            speed_update_threshold: 5000.0,
            raycast_half_length: 60.0,
            recenter_strategy: RecenterStrategy::Rebuild,
            random_seed: None,
        }
    }
}

impl FoliageSettings {
    /// Full side length of the captured area, honouring the grid multiplier.
    pub fn covered_width(&self) -> f64 {
        self.capture_width * self.grid_size.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoliageConfig {
    pub settings: FoliageSettings,
    pub classifications: Vec<ClassificationType>,
}

impl FoliageConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn culling_distances_do_not_affect_identity() {
        let a = GeometryDescriptor::with_mesh("meshes/pine");
        let mut b = a.clone();
        b.culling_distances = FloatInterval::new(10.0, 20.0);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));

        let mut c = a.clone();
        c.density = 0.75;
        assert_ne!(a, c);
        assert!(!set.contains(&c));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = FoliageConfig::from_json_str(
            r#"{
                "settings": { "capture_elevation": 800.0, "recenter_strategy": "offset_instances" },
                "classifications": [{
                    "label": "forest",
                    "color": { "r": 0.0, "g": 1.0, "b": 0.0, "a": 1.0 },
                    "geometries": [{ "mesh": "meshes/pine", "density": 1.0 }]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.settings.capture_elevation, 800.0);
        assert_eq!(config.settings.update_foliage_after_num_frames, 2);
        assert_eq!(
            config.settings.recenter_strategy,
            RecenterStrategy::OffsetInstances
        );

        let forest = &config.classifications[0];
        assert_eq!(forest.pooled_batches_per_geometry, 4);
        assert_eq!(forest.geometries[0].mesh, Some(MeshRef::from("meshes/pine")));
        assert_eq!(forest.geometries[0].scale, FloatInterval::new(1.0, 1.0));
        assert!(forest.geometries[0].collides_with_world);
    }

    #[test]
    fn grid_size_zero_covers_one_capture() {
        let mut settings = FoliageSettings::default();
        assert_eq!(settings.covered_width(), settings.capture_width);
        settings.grid_size = 3;
        assert_eq!(settings.covered_width(), settings.capture_width * 3.0);
    }
}
