//! Error types for the deployment controller

use thiserror::Error;

/// Main error type for the deployment controller
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A command could not be spawned or exited non-zero
    #[error("Command failed: {command} ({status})")]
    CommandFailed { command: String, status: String },

    #[error("Build failed for {deployment}: {reason}")]
    BuildFailed { deployment: String, reason: String },

    #[error("Start failed for {deployment}: {reason}")]
    StartFailed { deployment: String, reason: String },

    #[error("Deployment {0} has no running container")]
    NotRunning(String),

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Patch error: {0}")]
    PatchError(String),

    #[error("Exposure error: {0}")]
    ExposureError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
