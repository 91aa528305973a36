//! Real-time foliage placement over a geodetic terrain.
//!
//! An overhead capture renders two rasters over a geographic rectangle: a
//! classification map (which foliage grows where) and a normal/depth map.
//! [`FoliageCapture`] reads them back, reprojects every pixel onto the curved
//! surface on a worker thread, samples instances stochastically and hands
//! them to pooled batches, which are committed a few per frame.
//!
//! The host drives everything through [`FoliageCapture::tick`] and reacts to
//! [`FoliageEvent`]s. A [`TriggerPolicy`] decides when the capture should
//! follow the viewer.

pub mod applier;
pub mod capture;
pub mod config;
pub mod error;
pub mod georef;
pub mod host;
pub mod pool;
pub mod projector;
pub mod raster;
pub mod recenter;
pub mod reprojector;
pub mod spawner;
pub mod transform;
pub mod trigger;

pub use applier::ApplierPass;
pub use capture::{CapturePhase, CycleId};
pub use config::{
    ClassificationType, FloatInterval, FoliageConfig, FoliageSettings, GeometryDescriptor,
    MeshRef, RecenterStrategy,
};
pub use error::{FoliageError, Result};
pub use georef::{PlanarGeoreference, SharedGeoreference};
pub use host::{CoordinateTransform, InstanceSink, NullSink, RandomSource, SurfaceHit, SurfaceQuery};
pub use pool::{BatchId, BatchState};
pub use projector::{CaptureExtents, GeoPoint, WorldBounds};
pub use raster::{
    ImageTarget, InlineReadback, LinearColor, RasterReadback, RenderTarget, ThreadedReadback,
};
pub use spawner::{FoliageCapture, FoliageEvent};
pub use transform::Transform;
pub use trigger::{TriggerPolicy, ViewerState};
