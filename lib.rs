//! Scanline racer: a pseudo-3D kart racing engine.
//!
//! The road is a ring of flat segments projected row by row, with sprites for
//! scenery, hazards and other racers layered back to front. Rendering goes
//! through the [`surface::Surface`] trait so the engine can draw into the
//! window's frame buffer or a test recorder alike.

pub mod assets;
pub mod config;
pub mod constants;
pub mod engine;
pub mod hud;
pub mod input;
pub mod math;
pub mod net;
pub mod obstacles;
pub mod projection;
pub mod surface;
pub mod theme;
pub mod track;

pub use engine::{EngineError, RaceEngine, RaceOptions, RaceState};
pub use track::{Difficulty, Track};
