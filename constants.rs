//! Fixed road geometry shared by the track builder, the projection and the
//! hazard subsystem.

pub const SEGMENT_LENGTH: f32 = 200.0;
pub const ROAD_WIDTH: f32 = 2000.0;
pub const LANES: usize = 3;
pub const DRAW_DISTANCE: usize = 200;
pub const CAMERA_HEIGHT: f32 = 1000.0;
/// Near-plane threshold and the resting projection depth.
pub const CAMERA_DEPTH: f32 = 0.8;

/// Number of flat segments appended as the finish straight.
pub const FINISH_STRAIGHT: usize = 50;
/// Leading segments painted with the start palette.
pub const START_BAND: usize = 5;
pub const CHECKPOINT_FIRST: usize = 20;
pub const CHECKPOINT_STRIDE: usize = 50;
/// Segments per minimap sample.
pub const MAP_SAMPLE_STRIDE: usize = 5;
pub const MAP_HEADING_GAIN: f32 = 0.003;

pub const DEFAULT_WIDTH: usize = 960;
pub const DEFAULT_HEIGHT: usize = 540;
