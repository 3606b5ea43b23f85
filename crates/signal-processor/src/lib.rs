//! Signal Processing
//!
//! Classifies repeats of configured bus messages as short or long presses,
//! suppresses bounces after an action, and dispatches the configured actions.

mod action;
mod error;
mod occurrence;
mod processor;
mod signal;

pub use action::{Action, ActionPerformer, VolumeDirection};
pub use error::{ActionError, SignalError};
pub use occurrence::{Classification, Occurrence, OccurrenceLog};
pub use processor::{SignalProcessor, APP_NAME};
pub use signal::{ClassifierMode, Signal, TICK};
