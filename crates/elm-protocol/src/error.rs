//! Link Error Types

use thiserror::Error;

/// Errors that can occur on the serial link to an ELM327 adapter
#[derive(Debug, Error)]
pub enum LinkError {
    /// Underlying stream error (read, write, flush)
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Connect attempt to the device failed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// Remote end closed the stream
    #[error("Link closed by remote device")]
    Closed,

    /// Operation attempted on a cancelled channel
    #[error("Link not connected")]
    NotConnected,
}

impl From<tokio_serial::Error> for LinkError {
    fn from(err: tokio_serial::Error) -> Self {
        LinkError::Serial(err.to_string())
    }
}
