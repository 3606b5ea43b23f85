//! ELM327 Link Layer
//!
//! This crate turns the noisy byte stream from an ELM327-style adapter into
//! discrete response frames, and owns the serial link those bytes travel on.

mod channel;
mod error;
mod framer;
mod protocol;
mod transport;

pub use channel::{ChannelConfig, IoChannel, LinkHandler, READ_BUFFER_SIZE};
pub use error::LinkError;
pub use framer::{Feed, Frame, ResponseFramer};
pub use protocol::{
    encode_command, split_startup_commands, BREAK, COMMAND_TERMINATOR, RESPONSE_TERMINATOR,
    STARTUP_COMMAND_SEPARATOR,
};
pub use transport::{
    AdapterState, BluetoothAdapter, Connector, Device, Link, SerialAdapter, SerialConnector,
    DEFAULT_BAUD_RATE,
};
