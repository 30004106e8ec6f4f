pub mod api;
pub mod client;
pub mod config;
pub mod control;
pub mod hub;
pub mod signaling;
pub mod status;
pub mod supervisor;

// Re-export commonly used types
pub use config::{Config, ConfigManager};
pub use control::StreamControl;

/// Camera identifiers are small integers assigned by the provisioning layer.
pub type CameraId = u32;

// Common error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Camera not found: {0}")]
    CameraNotFound(CameraId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transcoder error: {0}")]
    TranscoderError(String),

    #[error("Playback error: {0}")]
    PlaybackFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Control surface error: {0}")]
    ControlError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
