//! Procedural terrain on the WGS-84 ellipsoid and a CPU stand-in for the
//! overhead capture render.

use foliage::projector::{self, CaptureExtents};
use foliage::{
    CoordinateTransform, GeoPoint, ImageTarget, LinearColor, SurfaceHit, SurfaceQuery,
    WorldBounds,
};
use glam::DVec3;
use std::f64::consts::TAU;
use std::sync::Arc;

const METRES_PER_DEGREE: f64 = 111_320.0;
/// Finite-difference step for slopes, degrees.
const SLOPE_STEP_DEG: f64 = 1e-5;

/// Rolling hills with a water level. Heights are metres above the ellipsoid.
#[derive(Debug, Clone)]
pub struct Terrain {
    pub base_height: f64,
    pub water_level: f64,
    /// Classification colours, one per land-cover band.
    pub palette: Vec<LinearColor>,
}

impl Terrain {
    pub fn new(palette: Vec<LinearColor>) -> Self {
        Self {
            base_height: 120.0,
            water_level: 70.0,
            palette,
        }
    }

    pub fn height(&self, lat: f64, lon: f64) -> f64 {
        let hills = (TAU * lat / 0.013).sin() * (TAU * lon / 0.017).cos();
        let ridges = (TAU * (lat + lon) / 0.004).sin();
        self.base_height + 80.0 * hills + 12.0 * ridges
    }

    /// Surface normal in east-north-up components.
    pub fn normal_enu(&self, lat: f64, lon: f64) -> DVec3 {
        let east_m = SLOPE_STEP_DEG * METRES_PER_DEGREE * lat.to_radians().cos();
        let north_m = SLOPE_STEP_DEG * METRES_PER_DEGREE;
        let dh_de = (self.height(lat, lon + SLOPE_STEP_DEG) - self.height(lat, lon - SLOPE_STEP_DEG))
            / (2.0 * east_m);
        let dh_dn = (self.height(lat + SLOPE_STEP_DEG, lon) - self.height(lat - SLOPE_STEP_DEG, lon))
            / (2.0 * north_m);
        DVec3::new(-dh_de, -dh_dn, 1.0).normalize()
    }

    /// Land-cover colour, transparent under water.
    pub fn classify(&self, lat: f64, lon: f64) -> LinearColor {
        if self.palette.is_empty() || self.height(lat, lon) < self.water_level {
            return LinearColor::TRANSPARENT;
        }
        let band = (TAU * lat / 0.007).sin() * (TAU * lon / 0.009).sin();
        let n = self.palette.len();
        let idx = (((band + 1.0) / 2.0) * n as f64) as usize;
        self.palette[idx.min(n - 1)]
    }
}

/// Ray queries against [`Terrain`] in engine space.
pub struct TerrainSurface {
    pub terrain: Arc<Terrain>,
    pub coordinates: Arc<dyn CoordinateTransform>,
}

impl SurfaceQuery for TerrainSurface {
    fn raycast_down(&self, origin: DVec3, _up: DVec3, max_distance: f64) -> Option<SurfaceHit> {
        let geo = self.coordinates.world_to_geodetic(origin);
        let ground = self.terrain.height(geo.lat, geo.lon);
        if (geo.height - ground).abs() > max_distance {
            return None;
        }
        let position = self
            .coordinates
            .geodetic_to_world(GeoPoint { height: ground, ..geo });
        let frame = self.coordinates.east_north_up_frame(position);
        Some(SurfaceHit {
            position,
            normal: frame * self.terrain.normal_enu(geo.lat, geo.lon),
        })
    }
}

/// The two capture rasters for one capture volume.
pub struct CaptureImages {
    pub distribution: Arc<ImageTarget>,
    pub normal_depth: Arc<ImageTarget>,
}

/// Renders what an orthographic camera at `elevation` would see over
/// `bounds`: classification colours, and world-space normals with depth
/// encoded in alpha.
pub fn render_capture(
    terrain: &Terrain,
    coordinates: &dyn CoordinateTransform,
    bounds: &WorldBounds,
    elevation: f64,
    resolution: u32,
) -> anyhow::Result<CaptureImages> {
    let extents = CaptureExtents::from_world_bounds(bounds, coordinates, elevation);
    let distribution = ImageTarget::new(resolution, resolution);
    let normal_depth = ImageTarget::new(resolution, resolution);

    for y in 0..resolution {
        for x in 0..resolution {
            let geo = projector::pixel_to_geographic(
                x as f64, y as f64, 0.0, resolution, resolution, &extents,
            )?;
            let height = terrain.height(geo.lat, geo.lon);
            let world = coordinates.geodetic_to_world(GeoPoint { height, ..geo });
            let normal = coordinates.east_north_up_frame(world) * terrain.normal_enu(geo.lat, geo.lon);

            distribution.set_pixel(x, y, terrain.classify(geo.lat, geo.lon));
            normal_depth.set_pixel(
                x,
                y,
                LinearColor::new(
                    normal.x as f32,
                    normal.y as f32,
                    normal.z as f32,
                    encode_depth(height, elevation) as f32,
                ),
            );
        }
    }

    Ok(CaptureImages {
        distribution: Arc::new(distribution),
        normal_depth: Arc::new(normal_depth),
    })
}

/// Inverse of [`projector::decode_elevation`].
fn encode_depth(height: f64, elevation: f64) -> f64 {
    1.0 - (elevation - height) / 1000.0
}
