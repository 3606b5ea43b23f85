//! Car Bus Bridge
//!
//! Keeps a connection to an ELM327 bus adapter alive, frames its responses,
//! fans every frame out to observers, and turns configured bus messages into
//! host actions.

mod bus_data;
mod error;
mod manager;
mod performer;
mod prefs;
mod queue;
mod state;
mod status;

pub use bus_data::{BusData, BusDataKind, BusObserver, ObserverGone, ObserverId, ObserverRegistry};
pub use error::BridgeError;
pub use manager::{
    Collaborators, ConnectionManager, ManagerConfig, MSG_COMMANDS_NOT_CONFIGURED,
    MSG_CONNECTION_LOST, MSG_MONITORS_NOT_CONFIGURED, MSG_NOT_CONFIGURED, MSG_NOT_ENABLED,
    MSG_NOT_PAIRED, MSG_NOT_READY, MSG_STARTING, MSG_STOPPED,
};
pub use performer::HostActionPerformer;
pub use prefs::{
    monitor_key, ConfigPreferences, Preferences, Settings, KEY_DEVICE_ADDRESS,
    KEY_STARTUP_COMMANDS, MONITOR_SLOTS,
};
pub use queue::{CommandQueue, CommandSink};
pub use state::ConnectionState;
pub use status::{LogStatusSink, Notice, StatusSink};

use tracing_subscriber::FmtSubscriber;

/// Initialize logging at the configured level
pub fn init_logging(settings: &Settings) -> Result<(), BridgeError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.level()?)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| BridgeError::Logging(e.to_string()))
}
