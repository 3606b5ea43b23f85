//! Signal and Action Error Types

use thiserror::Error;

/// Errors in a signal definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Wrong number of `|`-separated fields
    #[error("Signal definition has {0} fields, expected 8")]
    FieldCount(usize),

    /// Message pattern is blank
    #[error("Signal message pattern is empty")]
    EmptyPattern,

    /// A timing field is not a non-negative integer
    #[error("Invalid {field} '{value}': expected milliseconds")]
    InvalidWindow { field: &'static str, value: String },

    /// A non-zero timing window does not exceed the processor tick
    #[error("{field} of {value_ms}ms must be longer than the {tick_ms}ms tick")]
    WindowTooShort {
        field: &'static str,
        value_ms: u64,
        tick_ms: u64,
    },
}

/// Errors performing an action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Argument value not accepted by the action
    #[error("Invalid argument '{value}' for {action}")]
    InvalidArgument { action: &'static str, value: String },

    /// The host cannot perform this kind of action
    #[error("Action not supported on this host: {0}")]
    Unsupported(String),

    /// The action ran and failed
    #[error("Action failed: {0}")]
    Failed(String),
}
