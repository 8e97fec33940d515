use crate::settings::{
    default_cooldown_seconds, default_min_duration_frames, default_post_roll_seconds,
    default_pre_roll_seconds, default_sensitivity, MotionSettings,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MotionCamConfig {
    pub camera: CameraConfig,
    pub detection: MotionSettings,
    pub analysis: AnalysisConfig,
    pub encoder: EncoderConfig,
    pub storage: StorageConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Label stamped on every captured event
    #[serde(default = "default_camera_name")]
    pub name: String,

    /// Where frames come from
    #[serde(default)]
    pub source: SourceKind,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Capture frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern; needs no hardware
    #[default]
    Synthetic,
    /// V4L2 camera through GStreamer (requires the `camera` feature)
    Camera,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Sampling ticks per second (display refresh cadence)
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Preferred codec; `auto` picks VP9 when the encoder element exists, else VP8
    #[serde(default)]
    pub codec: Codec,

    /// Target bitrate in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Auto,
    Vp9,
    Vp8,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory completed events are written to
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Write each event's clip to `<path>/<filename>`
    #[serde(default = "default_save_payloads")]
    pub save_payloads: bool,

    /// Write `<path>/<id>.json` alongside each clip
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Completed events retained in memory (oldest dropped first)
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

impl MotionCamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("motioncam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.name", default_camera_name())?
            .set_default("camera.source", "synthetic")?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("detection.sensitivity", default_sensitivity())?
            .set_default(
                "detection.min_duration_frames",
                default_min_duration_frames(),
            )?
            .set_default("detection.cooldown_seconds", default_cooldown_seconds())?
            .set_default("detection.pre_roll_seconds", default_pre_roll_seconds())?
            .set_default("detection.post_roll_seconds", default_post_roll_seconds())?
            .set_default("analysis.tick_hz", default_tick_hz())?
            .set_default("encoder.codec", "auto")?
            .set_default("encoder.bitrate", default_bitrate())?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.save_payloads", default_save_payloads())?
            .set_default("storage.save_metadata", default_save_metadata())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.event_log_capacity",
                default_event_log_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // MOTIONCAM_DETECTION__SENSITIVITY=0.1 -> detection.sensitivity
            .add_source(
                Environment::with_prefix("MOTIONCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MotionCamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detection
            .validate()
            .map_err(|e| ConfigError::Message(format!("Invalid detection settings: {}", e)))?;

        if self.camera.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Camera name must not be empty".to_string(),
            ));
        }

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.analysis.tick_hz == 0 || self.analysis.tick_hz > 240 {
            return Err(ConfigError::Message(
                "Analysis tick_hz must be between 1 and 240".to_string(),
            ));
        }

        if self.encoder.bitrate == 0 {
            return Err(ConfigError::Message(
                "Encoder bitrate must be greater than 0".to_string(),
            ));
        }

        if (self.storage.save_payloads || self.storage.save_metadata)
            && self.storage.path.trim().is_empty()
        {
            return Err(ConfigError::Message(
                "Storage path must be set when saving events".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_log_capacity == 0 {
            return Err(ConfigError::Message(
                "Event log capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for MotionCamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                name: default_camera_name(),
                source: SourceKind::default(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
            },
            detection: MotionSettings::default(),
            analysis: AnalysisConfig {
                tick_hz: default_tick_hz(),
            },
            encoder: EncoderConfig {
                codec: Codec::default(),
                bitrate: default_bitrate(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                save_payloads: default_save_payloads(),
                save_metadata: default_save_metadata(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                event_log_capacity: default_event_log_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_name() -> String {
    "GoPro".to_string()
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}

fn default_tick_hz() -> u32 {
    60
}

fn default_bitrate() -> u32 {
    2_500_000
}

fn default_storage_path() -> String {
    "./events".to_string()
}
fn default_save_payloads() -> bool {
    true
}
fn default_save_metadata() -> bool {
    false
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_event_log_capacity() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MotionCamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.name, "GoPro");
        assert_eq!(config.camera.source, SourceKind::Synthetic);
        assert_eq!(config.analysis.tick_hz, 60);
        assert_eq!(config.encoder.bitrate, 2_500_000);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
name = "Porch"

[detection]
sensitivity = 0.1
pre_roll_seconds = 15
"#
        )
        .unwrap();

        let config = MotionCamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.name, "Porch");
        assert_eq!(config.detection.sensitivity, 0.1);
        assert_eq!(config.detection.pre_roll_seconds, 15);
        // Untouched values come from defaults
        assert_eq!(config.detection.post_roll_seconds, 30);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MotionCamConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, MotionCamConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MotionCamConfig::default();
        config.detection.cooldown_seconds = 1;
        assert!(config.validate().is_err());

        config.detection.cooldown_seconds = 30;
        config.analysis.tick_hz = 0;
        assert!(config.validate().is_err());

        config.analysis.tick_hz = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = MotionCamConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[detection]"));
        let parsed: MotionCamConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
