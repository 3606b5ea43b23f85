//! Connection State

use serde::{Deserialize, Serialize};

/// State of the link to the bus adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Shutting down for good; nothing restarts from here
    Destroying,
    /// No link and no attempt in progress
    #[default]
    None,
    /// A connect attempt is pending or running
    Connecting,
    /// Connected and nothing pending; the command queue may send
    Idle,
    /// Response bytes are arriving
    Receiving,
    /// A command has been written and its response has not completed
    Transmitting,
}

impl ConnectionState {
    /// Idle, Receiving or Transmitting
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Receiving | ConnectionState::Transmitting
        )
    }
}
