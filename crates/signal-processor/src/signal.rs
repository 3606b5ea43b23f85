//! Signal Definitions
//!
//! A signal binds one exact bus message to its timing windows and the
//! actions to run when repeats of that message are classified. Definitions
//! come from preferences as eight `|`-separated fields:
//!
//! `pattern|silentErrors|ignoreAfterActionMs|shortWindowMs|longWindowMs|longWatchMs|shortAction|longAction`

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::occurrence::Classification;

/// Period of the processor tick; every non-zero window must exceed it
pub const TICK: Duration = Duration::from_millis(15);

const FIELD_COUNT: usize = 8;

/// How a signal's occurrences are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierMode {
    /// Every occurrence is a short press, no timing
    PassThrough,
    /// Short once the short window has elapsed
    ShortOnly,
    /// Long once the long window has elapsed
    LongOnly,
    /// Short or long, decided when the watch window closes
    Watch,
}

/// A configured bus message pattern with timing and actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Exact frame text that counts as an occurrence
    pub pattern: String,
    /// Swallow action failures instead of raising an alert
    pub silent_errors: bool,
    /// Occurrences this soon after an action are ignored
    pub ignore_after_action_ms: u64,
    /// Minimum time to group repeats as a short press
    pub short_window_ms: u64,
    /// Minimum span of repeats to count as a long press
    pub long_window_ms: u64,
    /// How long to watch repeats before deciding short or long
    pub long_watch_ms: u64,
    /// Action for a short press (or every occurrence in pass-through mode)
    pub short_action: String,
    /// Action for a long press
    pub long_action: String,
}

impl Signal {
    /// Parse a `|`-separated definition and validate its timing
    pub fn parse(definition: &str) -> Result<Self, SignalError> {
        let fields: Vec<&str> = definition.splitn(FIELD_COUNT, '|').map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(SignalError::FieldCount(fields.len()));
        }

        let pattern = fields[0];
        if pattern.is_empty() {
            return Err(SignalError::EmptyPattern);
        }

        let signal = Self {
            pattern: pattern.to_string(),
            silent_errors: fields[1].eq_ignore_ascii_case("true"),
            ignore_after_action_ms: parse_window("ignoreAfterActionMs", fields[2])?,
            short_window_ms: parse_window("shortWindowMs", fields[3])?,
            long_window_ms: parse_window("longWindowMs", fields[4])?,
            long_watch_ms: parse_window("longWatchMs", fields[5])?,
            short_action: fields[6].to_string(),
            long_action: fields[7].to_string(),
        };

        signal.validate()?;
        Ok(signal)
    }

    /// Reject any configured window the tick cannot resolve
    pub fn validate(&self) -> Result<(), SignalError> {
        let tick_ms = TICK.as_millis() as u64;
        let windows = [
            ("ignoreAfterActionMs", self.ignore_after_action_ms),
            ("shortWindowMs", self.short_window_ms),
            ("longWindowMs", self.long_window_ms),
            ("longWatchMs", self.long_watch_ms),
        ];

        for (field, value_ms) in windows {
            if value_ms > 0 && value_ms <= tick_ms {
                return Err(SignalError::WindowTooShort {
                    field,
                    value_ms,
                    tick_ms,
                });
            }
        }
        Ok(())
    }

    /// Classification mode implied by the configured windows
    pub fn mode(&self) -> ClassifierMode {
        if self.ignore_after_action_ms == 0 && self.short_window_ms == 0 && self.long_window_ms == 0 {
            ClassifierMode::PassThrough
        } else if self.long_window_ms > 0 && (self.short_window_ms > 0 || self.long_watch_ms > 0) {
            ClassifierMode::Watch
        } else if self.long_window_ms > 0 {
            ClassifierMode::LongOnly
        } else {
            ClassifierMode::ShortOnly
        }
    }

    /// Action to dispatch for a classification, if one is configured
    pub fn action_for(&self, classification: Classification) -> Option<&str> {
        let action = match classification {
            Classification::Short => &self.short_action,
            Classification::Long => &self.long_action,
            Classification::Unknown | Classification::Ignored => return None,
        };
        (!action.is_empty()).then_some(action.as_str())
    }

    pub fn ignore_after_action(&self) -> Duration {
        Duration::from_millis(self.ignore_after_action_ms)
    }

    pub fn short_window(&self) -> Duration {
        Duration::from_millis(self.short_window_ms)
    }

    pub fn long_window(&self) -> Duration {
        Duration::from_millis(self.long_window_ms)
    }

    pub fn long_watch(&self) -> Duration {
        Duration::from_millis(self.long_watch_ms)
    }
}

impl FromStr for Signal {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_window(field: &'static str, value: &str) -> Result<u64, SignalError> {
    value.parse::<u64>().map_err(|_| SignalError::InvalidWindow {
        field,
        value: value.to_string(),
    })
}
