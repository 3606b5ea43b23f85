//! Status Reporting

use tracing::{info, warn};

/// Receives user-facing status and error text
pub trait StatusSink: Send + Sync {
    fn set_status(&self, status: &str);

    /// An empty error clears the previous one
    fn set_error(&self, error: &str);
}

/// Current status and error pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notice {
    pub status: String,
    pub error: String,
}

impl Notice {
    /// `status | error`, with the separator only when both are present
    pub fn text(&self) -> String {
        match (self.status.is_empty(), self.error.is_empty()) {
            (false, false) => format!("{} | {}", self.status, self.error),
            (false, true) => self.status.clone(),
            (true, false) => self.error.clone(),
            (true, true) => String::new(),
        }
    }
}

/// Status sink that writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn set_status(&self, status: &str) {
        info!("Status: {}", status);
    }

    fn set_error(&self, error: &str) {
        if !error.is_empty() {
            warn!("Error: {}", error);
        }
    }
}
