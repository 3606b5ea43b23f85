//! Transport Capabilities
//!
//! The connection manager only needs three things from the platform: whether
//! the radio is usable, a handle for the configured (already paired) device,
//! and a way to open a byte stream to it. Each is a trait so platforms can
//! build the socket however they must; [`SerialAdapter`] and
//! [`SerialConnector`] cover a bound RFCOMM tty (`/dev/rfcomm0`) or any other
//! serial device.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::error::LinkError;

/// Default baud rate for ELM327 adapters
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// An already-bonded remote device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device address as configured by the user
    pub address: String,
    /// Human-readable name used in status text
    pub name: String,
    /// Whether the device is paired with this host
    pub bonded: bool,
}

/// Radio adapter power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    /// Adapter is powered and usable
    On,
    /// Adapter is powering down
    TurningOff,
    /// Adapter is off
    Off,
}

/// Host radio adapter
pub trait BluetoothAdapter: Send + Sync {
    /// Whether the adapter exists and is enabled
    fn is_enabled(&self) -> bool;

    /// Look up the device for an address, without discovery or pairing
    fn remote_device(&self, address: &str) -> Option<Device>;
}

/// Byte stream to a connected device
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Link for T {}

/// Opens connections to a device
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open an exclusive byte-stream connection to the device
    async fn connect(&self, device: &Device) -> Result<Box<dyn Link>, LinkError>;
}

/// Adapter for devices exposed as serial ttys
///
/// The address is the tty path; the device counts as bonded when the path
/// exists (an RFCOMM binding only exists for a paired device).
#[derive(Debug, Clone, Default)]
pub struct SerialAdapter;

impl BluetoothAdapter for SerialAdapter {
    fn is_enabled(&self) -> bool {
        true
    }

    fn remote_device(&self, address: &str) -> Option<Device> {
        let path = Path::new(address);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| address.to_string());
        let bonded = path.exists();
        debug!("Resolved device {} (bonded: {})", address, bonded);

        Some(Device {
            address: address.to_string(),
            name,
            bonded,
        })
    }
}

/// Connector that opens the device address as a serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    /// Create a connector using the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, device: &Device) -> Result<Box<dyn Link>, LinkError> {
        info!("Opening serial link {} at {} baud", device.address, self.baud_rate);

        let port = tokio_serial::new(device.address.as_str(), self.baud_rate)
            .open_native_async()
            .map_err(|e| LinkError::ConnectFailed {
                address: device.address.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(port))
    }
}
