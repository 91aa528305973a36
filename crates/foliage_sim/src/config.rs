use clap::Parser;
use std::path::PathBuf;

/// `foliage_sim` - A headless flight over a procedural planet that drives the
/// foliage capture pipeline frame by frame.
///
/// Each frame the camera advances along a great-circle heading, the trigger
/// policy decides whether the capture should follow it, and the capture is
/// ticked. Capture rasters are rendered on the CPU from the procedural
/// terrain.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// JSON foliage configuration (settings and classifications).
    ///
    /// When omitted a built-in meadow/forest/scrub set is used.
    #[arg(long, env = "FOLIAGE_CONFIG")]
    pub foliage_config: Option<PathBuf>,

    /// Frames to simulate before exiting; 0 runs until interrupted.
    #[arg(long, env = "SIM_FRAMES", default_value_t = 1800)]
    pub frames: u64,

    /// Simulation frame rate.
    #[arg(long, env = "SIM_FRAME_RATE_HZ", default_value_t = 60)]
    pub frame_rate_hz: u64,

    /// Latitude of the georeference origin and of the flight start, degrees.
    #[arg(long, env = "SIM_ORIGIN_LAT", default_value_t = 46.55)]
    pub origin_lat: f64,

    /// Longitude of the georeference origin and of the flight start, degrees.
    #[arg(long, env = "SIM_ORIGIN_LON", default_value_t = 7.98)]
    pub origin_lon: f64,

    /// Camera height above the ellipsoid, metres.
    #[arg(long, env = "SIM_FLIGHT_ALTITUDE", default_value_t = 400.0)]
    pub flight_altitude: f64,

    /// Camera ground speed, metres per second.
    #[arg(long, env = "SIM_FLIGHT_SPEED", default_value_t = 90.0)]
    pub flight_speed: f64,

    /// Flight heading, degrees clockwise from north.
    #[arg(long, env = "SIM_FLIGHT_HEADING", default_value_t = 60.0)]
    pub flight_heading: f64,

    /// Side length in pixels of the two capture rasters.
    #[arg(long, env = "SIM_CAPTURE_RESOLUTION", default_value_t = 128)]
    pub capture_resolution: u32,

    /// Shift the world origin under the camera once it is this far away
    /// (metres). 0 disables rebasing.
    #[arg(long, env = "SIM_REBASE_DISTANCE", default_value_t = 5000.0)]
    pub rebase_distance: f64,

    /// Overrides the placement seed from the foliage configuration.
    #[arg(long, env = "SIM_SEED")]
    pub seed: Option<u64>,
}
