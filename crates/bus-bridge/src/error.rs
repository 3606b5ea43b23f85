//! Bridge Error Types

use thiserror::Error;

/// Errors setting up the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configured value is unusable
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Logging could not be installed
    #[error("Failed to install logging: {0}")]
    Logging(String),
}
