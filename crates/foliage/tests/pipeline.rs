use foliage::raster::ReadbackCallback;
use foliage::{
    BatchState, ClassificationType, CoordinateTransform, FoliageCapture, FoliageConfig,
    FoliageError, FoliageEvent, FoliageSettings, GeometryDescriptor, ImageTarget, InlineReadback,
    LinearColor, PlanarGeoreference, RasterReadback, RenderTarget, SharedGeoreference,
    ThreadedReadback, Transform,
};
use geodesy::{Geodetic, Georeference};
use glam::DVec3;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MEADOW: LinearColor = LinearColor::new(0.2, 0.8, 0.1, 1.0);
const WATER: LinearColor = LinearColor::new(0.0, 0.0, 1.0, 1.0);
const FLAT_UP: LinearColor = LinearColor::new(0.0, 0.0, 1.0, 1.0);

fn meadow(pooled: u32) -> ClassificationType {
    ClassificationType {
        label: "meadow".into(),
        color: MEADOW,
        pooled_batches_per_geometry: pooled,
        geometries: vec![GeometryDescriptor {
            density: 1.0,
            ..GeometryDescriptor::with_mesh("meshes/grass")
        }],
        ..Default::default()
    }
}

fn config(pooled: u32) -> FoliageConfig {
    FoliageConfig {
        settings: FoliageSettings {
            update_foliage_after_num_frames: 1,
            max_components_to_update_per_frame: 8,
            capture_width: 400.0,
            random_seed: Some(42),
            ..Default::default()
        },
        classifications: vec![meadow(pooled)],
    }
}

fn targets(classification: Vec<LinearColor>) -> (Arc<dyn RenderTarget>, Arc<dyn RenderTarget>) {
    let n = classification.len();
    let side = (n as f64).sqrt() as u32;
    (
        Arc::new(ImageTarget::from_pixels(side, side, classification)),
        Arc::new(ImageTarget::from_pixels(side, side, vec![FLAT_UP; n])),
    )
}

/// Keeps callbacks until the test releases them.
#[derive(Default)]
struct ManualReadback(Mutex<Vec<(Vec<Arc<dyn RenderTarget>>, ReadbackCallback)>>);

impl ManualReadback {
    fn release(&self) {
        let jobs: Vec<_> = self.0.lock().drain(..).collect();
        for (targets, callback) in jobs {
            let buffers = targets.iter().map(|t| t.read_surface()).collect();
            callback(true, buffers);
        }
    }
}

impl RasterReadback for ManualReadback {
    fn read_async(&self, targets: Vec<Arc<dyn RenderTarget>>, callback: ReadbackCallback) {
        self.0.lock().push((targets, callback));
    }
}

#[test]
fn single_matching_pixel_lands_in_first_batch() {
    let mut capture = FoliageCapture::new(config(2), Arc::new(InlineReadback))
        .with_coordinates(Arc::new(PlanarGeoreference::new(1000.0)));
    let (distribution, normal_depth) = targets(vec![WATER, MEADOW, WATER, WATER]);

    capture
        .request_capture(distribution, normal_depth, capture.capture_bounds())
        .unwrap();
    let pass = capture.tick().unwrap();
    assert_eq!(pass.added, 1);
    assert_eq!(pass.instances_added, 1);

    let states: Vec<_> = capture.pool().batches().map(|b| b.state()).collect();
    assert_eq!(states, vec![BatchState::Idle, BatchState::Cleared]);
    assert_eq!(capture.instance_count(), 1);

    let first = capture.pool().batches().next().unwrap();
    let instance = first.instances()[0];
    assert_eq!(instance.scale, DVec3::ONE);
    assert!(instance.is_rotation_normalized());

    assert!(matches!(
        capture.drain_events().as_slice(),
        [FoliageEvent::CaptureCommitted {
            instances: 1,
            batches: 1,
            ..
        }]
    ));
}

#[test]
fn requests_while_building_do_nothing() {
    let readback = Arc::new(ManualReadback::default());
    let mut capture = FoliageCapture::new(config(1), readback.clone())
        .with_coordinates(Arc::new(PlanarGeoreference::new(1000.0)));

    let (a, b) = targets(vec![MEADOW; 4]);
    let cycle = capture
        .request_capture(a.clone(), b.clone(), capture.capture_bounds())
        .unwrap();
    assert!(capture.is_building());

    let again = capture.request_capture(a, b, capture.capture_bounds());
    assert!(matches!(again, Err(FoliageError::CaptureInProgress(c)) if c == cycle));
    assert_eq!(readback.0.lock().len(), 1);

    // Nothing commits while the readback is outstanding.
    capture.tick();
    assert!(capture.is_building());
    assert_eq!(capture.instance_count(), 0);

    readback.release();
    capture.tick();
    assert!(!capture.is_building());
    assert_eq!(capture.instance_count(), 4);
}

#[test]
fn rebase_offset_applies_only_during_rebase() {
    let readback = Arc::new(ManualReadback::default());
    let mut capture = FoliageCapture::new(config(1), readback.clone())
        .with_coordinates(Arc::new(PlanarGeoreference::new(1000.0)));
    let world_positions = |capture: &FoliageCapture| -> Vec<DVec3> {
        capture
            .pool()
            .batches()
            .flat_map(|b| b.instances().iter())
            .map(|t| capture.anchor().compose(t).translation)
            .collect()
    };

    let (a, b) = targets(vec![MEADOW]);
    capture
        .request_capture(a.clone(), b.clone(), capture.capture_bounds())
        .unwrap();
    readback.release();
    capture.tick();
    let baseline = world_positions(&capture)[0];

    let shift = DVec3::new(250.0, -125.0, 0.0);
    capture.on_rebase_start(DVec3::ZERO, shift);
    capture.clear_foliage_instances();
    capture
        .request_capture(a.clone(), b.clone(), capture.capture_bounds())
        .unwrap();
    readback.release();
    capture.tick();
    let rebased = world_positions(&capture);
    assert_eq!(rebased.len(), 1);
    assert!((rebased[0] - (baseline + shift)).length() < 1e-9);

    capture.on_rebase_end();
    assert_eq!(capture.recenter().world_offset(), DVec3::ZERO);
    capture.clear_foliage_instances();
    capture.request_capture(a, b, capture.capture_bounds()).unwrap();
    readback.release();
    capture.tick();
    let settled = world_positions(&capture);
    assert_eq!(settled.len(), 1);
    assert!((settled[0] - baseline).length() < 1e-9);
}

#[test]
fn full_cycle_on_the_ellipsoid_with_threaded_readback() {
    let georef =
        SharedGeoreference::new(Georeference::new(Geodetic::new(46.55, 7.98, 0.0)).unwrap());
    let readback = Arc::new(ThreadedReadback::spawn().unwrap());
    let mut capture = FoliageCapture::new(config(3), readback)
        .with_coordinates(Arc::new(georef.clone()))
        .with_anchor(Transform::from_translation(DVec3::new(0.0, 0.0, 1024.0)));

    // Depth 0.9 decodes to 100 m below the capture elevation.
    let side = 16u32;
    let n = (side * side) as usize;
    let distribution: Arc<dyn RenderTarget> =
        Arc::new(ImageTarget::from_pixels(side, side, vec![MEADOW; n]));
    let normal_depth: Arc<dyn RenderTarget> = Arc::new(ImageTarget::from_pixels(
        side,
        side,
        vec![LinearColor::new(0.0, 0.0, 1.0, 0.9); n],
    ));

    capture
        .request_capture(distribution, normal_depth, capture.capture_bounds())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while capture.instance_count() < n {
        assert!(Instant::now() < deadline, "capture never committed");
        capture.tick();
        std::thread::sleep(Duration::from_millis(1));
    }

    let counts: Vec<_> = capture
        .pool()
        .batches()
        .map(|b| b.instances().len())
        .collect();
    assert_eq!(counts.iter().sum::<usize>(), n);
    assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);

    for batch in capture.pool().batches() {
        for instance in batch.instances() {
            let world = capture.anchor().compose(instance);
            let geo = georef.world_to_geodetic(world.translation);
            assert!((geo.height - 924.0).abs() < 1e-3, "height {}", geo.height);
            assert!(world.up().dot(DVec3::Z) > 0.999);
        }
    }
}
