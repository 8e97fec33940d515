use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotionCamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Video source error: {0}")]
    Source(#[from] SourceError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures opening or reading the live video source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Permission denied for video device {device}")]
    PermissionDenied { device: String },

    #[error("Video device {device} is unavailable: {details}")]
    Unavailable { device: String, details: String },

    #[error("Video source configuration failed: {details}")]
    Configuration { details: String },

    #[error("Failed to read frame: {details}")]
    Read { details: String },
}

/// Failures starting or driving a segment encoder
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder initialization failed: {details}")]
    Initialization { details: String },

    #[error("Encoder is not running")]
    NotRunning,

    #[error("Encoder is already running")]
    AlreadyRunning,

    #[error("Encoder pipeline error: {details}")]
    Pipeline { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("{field} = {value} is outside the allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl MotionCamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MotionCamError>;
