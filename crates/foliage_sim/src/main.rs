mod config;
mod flight;
mod metrics;
mod terrain;

use crate::config::Config;
use anyhow::Context;
use clap::Parser;
use flight::Flight;
use foliage::{
    ClassificationType, FloatInterval, FoliageCapture, FoliageConfig, FoliageEvent,
    GeometryDescriptor, LinearColor, SharedGeoreference, ThreadedReadback, TriggerPolicy,
};
use geodesy::{Geodetic, Georeference};
use glam::DVec3;
use metrics::{LiveInstanceSink, SimMetrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use terrain::{Terrain, TerrainSurface};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    let config = Config::parse();
    tracing::info!(config = ?config, "Simulation starting with configuration");

    let mut foliage_config = match &config.foliage_config {
        Some(path) => FoliageConfig::from_path(path)
            .with_context(|| format!("loading foliage config from {}", path.display()))?,
        None => default_foliage_config(),
    };
    if config.seed.is_some() {
        foliage_config.settings.random_seed = config.seed;
    }
    let capture_elevation = foliage_config.settings.capture_elevation;

    let origin = Geodetic::new(config.origin_lat, config.origin_lon, 0.0);
    let georef = SharedGeoreference::new(
        Georeference::new(origin).context("invalid simulation origin")?,
    );
    let terrain = Arc::new(Terrain::new(
        foliage_config
            .classifications
            .iter()
            .map(|c| c.color)
            .collect(),
    ));

    let metrics = SimMetrics::new().context("registering metrics")?;
    let readback = ThreadedReadback::spawn().context("spawning readback thread")?;
    let mut capture = FoliageCapture::new(foliage_config, Arc::new(readback))
        .with_coordinates(Arc::new(georef.clone()))
        .with_surface(Arc::new(TerrainSurface {
            terrain: terrain.clone(),
            coordinates: Arc::new(georef.clone()),
        }))
        .with_sink(Box::new(LiveInstanceSink::new(metrics.instances_live.clone())));

    let mut flight = Flight::new(
        Geodetic::new(config.origin_lat, config.origin_lon, config.flight_altitude),
        config.flight_heading,
        config.flight_speed,
    );
    let mut policy = TriggerPolicy::new();

    // --- 2. Frame Loop ---
    let frame_time = Duration::from_millis(1000 / config.frame_rate_hz.max(1));
    let mut interval = tokio::time::interval(frame_time);
    let mut last_tick = Instant::now();
    let mut frame: u64 = 0;
    let mut rebasing = false;

    tracing::info!("Starting frame loop...");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received.");
                break;
            },
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick);
                last_tick = now;
                frame += 1;

                if rebasing {
                    capture.on_rebase_end();
                    rebasing = false;
                }

                flight.advance(dt);
                let viewer = flight.viewer(&georef);
                match policy.tick(&viewer, &mut capture) {
                    Ok(true) => metrics.recenters_total.inc(),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to re-centre capture"),
                }

                capture.tick();
                for event in capture.drain_events() {
                    match event {
                        FoliageEvent::InstancesCleared { actor_offset } => {
                            tracing::debug!(offset = ?actor_offset, "Rendering new capture");
                            let bounds = capture.capture_bounds();
                            let images = terrain::render_capture(
                                &terrain,
                                &georef,
                                &bounds,
                                capture_elevation,
                                config.capture_resolution,
                            )?;
                            if let Err(e) = capture.request_capture(images.distribution, images.normal_depth, bounds) {
                                tracing::warn!(error = %e, "Capture request rejected");
                            }
                        },
                        FoliageEvent::CaptureCommitted { instances, .. } => {
                            metrics.cycles_total.inc();
                            metrics.instances_generated_total.inc_by(instances as u64);
                        },
                        FoliageEvent::CaptureFailed { cycle, reason } => {
                            tracing::warn!(cycle, %reason, "Capture cycle failed");
                            metrics.cycles_failed_total.inc();
                        },
                    }
                }

                if config.rebase_distance > 0.0 && !capture.is_building() {
                    let camera = viewer.position;
                    let horizontal = DVec3::new(camera.x, camera.y, 0.0);
                    if horizontal.length() > config.rebase_distance {
                        let old_origin = georef.origin_shift();
                        let new_origin = old_origin + horizontal;
                        capture.on_rebase_start(old_origin, new_origin);
                        georef.translate_origin(horizontal);
                        capture.translate_anchor(-horizontal);
                        rebasing = true;
                        tracing::info!(frame, shift = ?horizontal, "World origin rebased");
                    }
                }

                if frame % 300 == 0 {
                    let p = flight.position();
                    tracing::info!(
                        frame,
                        lat = p.lat_deg,
                        lon = p.lon_deg,
                        instances = capture.instance_count(),
                        "Simulation progress"
                    );
                }
                if config.frames > 0 && frame >= config.frames {
                    tracing::info!(frame, "Frame budget reached.");
                    break;
                }
            }
        }
    }

    tracing::info!("Simulation shutting down.");
    println!("{}", metrics.encode()?);
    Ok(())
}

fn default_foliage_config() -> FoliageConfig {
    let mut config = FoliageConfig::default();
    config.settings.capture_width = 655.36;
    config.settings.grid_size = 2;
    config.classifications = vec![
        ClassificationType {
            label: "meadow".into(),
            color: LinearColor::new(0.55, 0.8, 0.25, 1.0),
            geometries: vec![GeometryDescriptor {
                density: 0.35,
                random_yaw: true,
                align_to_normal: true,
                scale: FloatInterval::new(0.6, 1.2),
                collides_with_world: false,
                ..GeometryDescriptor::with_mesh("meshes/grass_clump")
            }],
            ..Default::default()
        },
        ClassificationType {
            label: "forest".into(),
            color: LinearColor::new(0.1, 0.45, 0.15, 1.0),
            align_to_surface_with_raycast: true,
            geometries: vec![
                GeometryDescriptor {
                    density: 0.2,
                    random_yaw: true,
                    scale: FloatInterval::new(0.8, 1.6),
                    z_offset: FloatInterval::new(-0.5, 0.0),
                    ..GeometryDescriptor::with_mesh("meshes/spruce")
                },
                GeometryDescriptor {
                    density: 0.1,
                    random_yaw: true,
                    align_to_normal: true,
                    ..GeometryDescriptor::with_mesh("meshes/fern")
                },
            ],
            ..Default::default()
        },
        ClassificationType {
            label: "scrub".into(),
            color: LinearColor::new(0.6, 0.5, 0.3, 1.0),
            pooled_batches_per_geometry: 2,
            geometries: vec![GeometryDescriptor {
                density: 0.15,
                random_yaw: true,
                scale: FloatInterval::new(0.5, 1.0),
                ..GeometryDescriptor::with_mesh("meshes/shrub")
            }],
            ..Default::default()
        },
    ];
    config
}
