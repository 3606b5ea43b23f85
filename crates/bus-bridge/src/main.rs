//! Bus bridge entry point
//!
//! Usage: `bus-bridge [config-path]`. Frames are printed to stdout as JSON
//! lines; stdin lines are sent to the adapter as direct commands.

use std::sync::Arc;

use anyhow::Context;
use bus_bridge::{
    init_logging, Collaborators, ConfigPreferences, ConnectionManager, HostActionPerformer,
    LogStatusSink, ManagerConfig,
};
use elm_protocol::{SerialAdapter, SerialConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "bus-bridge.toml";
const STARTUP_COMMAND: &str = "!startup";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let prefs = ConfigPreferences::load(&path).context("loading configuration")?;
    let settings = prefs.settings().context("reading settings")?;
    init_logging(&settings)?;

    info!("=== Car Bus Bridge v{} ===", env!("CARGO_PKG_VERSION"));

    let manager = Arc::new(ConnectionManager::new(
        Collaborators {
            adapter: Arc::new(SerialAdapter),
            connector: Arc::new(SerialConnector::new(settings.baud_rate)),
            prefs: Arc::new(prefs),
            performer: Arc::new(HostActionPerformer),
            status: Arc::new(LogStatusSink),
        },
        ManagerConfig::from(&settings),
    ));

    let mut frames = manager.subscribe();
    tokio::spawn(async move {
        while let Some(data) = frames.recv().await {
            match serde_json::to_string(&data) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode frame: {}", e),
            }
        }
    });

    let input = manager.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line == STARTUP_COMMAND {
                        input.send_startup_commands();
                    } else if !line.is_empty() {
                        input.send_command(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    manager.ensure_started();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("Interrupted");
            manager.shutdown();
        }
        _ = manager.closed() => {}
    }

    manager.closed().await;
    info!("Stopped");
    Ok(())
}
