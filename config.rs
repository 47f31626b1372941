//! Tunable race settings.
//!
//! Every field has a default, so a TOML file only needs to name the values it
//! overrides:
//!
//! ```toml
//! [physics]
//! max_speed = 12000.0
//!
//! [network]
//! send_interval_ms = 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{CAMERA_DEPTH, SEGMENT_LENGTH};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RaceConfig {
    pub physics: PhysicsConfig,
    pub camera: CameraConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Top speed without boost, world units per second.
    pub max_speed: f32,
    pub boost_factor: f32,
    /// Boost meter drain while active, units per second.
    pub nos_drain: f32,
    pub nos_regen: f32,
    /// Meter level a drained boost must recharge to before it unlocks.
    pub nos_unlock: f32,
    pub off_road_decay: f32,
    pub puddle_penalty: f32,
    pub puddle_drag: f32,
    pub puddle_accel: f32,
    /// Minimum fraction of the full turn rate, whatever the speed.
    pub min_turn: f32,
    /// Seconds throttle and brake are ignored after a hazard hit.
    pub input_lock: f32,
    pub impact_duration: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_speed: SEGMENT_LENGTH * 50.0,
            boost_factor: 1.6,
            nos_drain: 15.0,
            nos_regen: 5.0,
            nos_unlock: 20.0,
            off_road_decay: 0.975,
            puddle_penalty: 3000.0,
            puddle_drag: 0.96,
            puddle_accel: 0.4,
            min_turn: 0.5,
            input_lock: 0.5,
            impact_duration: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub base_depth: f32,
    pub zoom_depth: f32,
    /// Speed above which the camera widens to `zoom_depth`.
    pub zoom_threshold: f32,
    pub depth_ease_rate: f32,
    pub lean_angle: f32,
    /// Per-tick lerp factor toward the lean target.
    pub lean_lerp: f32,
    pub shake_threshold: f32,
    pub shake_intensity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            base_depth: CAMERA_DEPTH,
            zoom_depth: 0.4,
            zoom_threshold: 11000.0,
            depth_ease_rate: 3.0,
            lean_angle: 0.12,
            lean_lerp: 0.04,
            shake_threshold: 8000.0,
            shake_intensity: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub send_interval_ms: u64,
    /// Largest frame delta fed to the simulation, in milliseconds.
    pub max_frame_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: 50,
            max_frame_ms: 1000,
        }
    }
}

impl NetworkConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn max_frame(&self) -> Duration {
        Duration::from_millis(self.max_frame_ms)
    }
}

impl RaceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded race config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_tuning() {
        let config = RaceConfig::default();
        assert_eq!(config.physics.max_speed, 10000.0);
        assert_eq!(config.physics.nos_unlock, 20.0);
        assert_eq!(config.camera.base_depth, CAMERA_DEPTH);
        assert_eq!(config.network.send_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = RaceConfig::from_toml_str(
            "[physics]\nmax_speed = 12000.0\n\n[network]\nsend_interval_ms = 100\n",
        )
        .unwrap();
        assert_eq!(config.physics.max_speed, 12000.0);
        assert_eq!(config.physics.boost_factor, 1.6);
        assert_eq!(config.network.send_interval_ms, 100);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nlean_angle = 0.2").unwrap();
        let config = RaceConfig::load(file.path()).unwrap();
        assert_eq!(config.camera.lean_angle, 0.2);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = RaceConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = RaceConfig::from_toml_str("[physics\nmax_speed = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
