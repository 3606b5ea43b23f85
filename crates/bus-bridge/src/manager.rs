//! Connection Manager
//!
//! Owns the connection state machine for one bus adapter:
//!
//! ```text
//! None --start--> Connecting --connected--> Idle <--> Transmitting
//!                     ^                      |  ^          |
//!                     |                      v  |          v
//!                     +----lost/failed---- Receiving <-----+
//! ```
//!
//! Every state change, framer update, observer notification and queue
//! mutation happens under one mutex. Background tasks (the connect attempt,
//! the I/O channel, the command queue) call back into the manager tagged with
//! the session they were started for; callbacks from a torn-down session are
//! ignored, so a late callback can never disturb a newer connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use elm_protocol::{
    encode_command, split_startup_commands, AdapterState, BluetoothAdapter, ChannelConfig,
    Connector, Device, Feed, Frame, IoChannel, Link, LinkError, LinkHandler, ResponseFramer,
};
use signal_processor::{ActionPerformer, Signal, SignalProcessor};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bus_data::{BusData, BusDataKind, BusObserver, ObserverId, ObserverRegistry};
use crate::prefs::{
    monitor_key, Preferences, Settings, KEY_DEVICE_ADDRESS, KEY_STARTUP_COMMANDS, MONITOR_SLOTS,
};
use crate::queue::{CommandQueue, CommandSink};
use crate::state::ConnectionState;
use crate::status::{Notice, StatusSink};

pub const MSG_STARTING: &str = "starting";
pub const MSG_STOPPED: &str = "stopped";
pub const MSG_NOT_ENABLED: &str = "bluetooth not enabled";
pub const MSG_NOT_CONFIGURED: &str = "bluetooth device not configured";
pub const MSG_NOT_PAIRED: &str = "bluetooth device not paired";
pub const MSG_MONITORS_NOT_CONFIGURED: &str = "bus monitors not configured";
pub const MSG_COMMANDS_NOT_CONFIGURED: &str = "bus commands not configured";
pub const MSG_CONNECTION_LOST: &str = "connection lost";
pub const MSG_NOT_READY: &str = "not ready";

/// Manager timing
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Delay before every connect attempt
    pub connect_retry_wait: Duration,
    /// Command queue poll period while the link is busy
    pub queue_busy_wait: Duration,
    pub channel: ChannelConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_retry_wait: Duration::from_millis(2000),
            queue_busy_wait: Duration::from_millis(100),
            channel: ChannelConfig::default(),
        }
    }
}

impl From<&Settings> for ManagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_retry_wait: settings.connect_retry_wait(),
            queue_busy_wait: settings.queue_busy_wait(),
            channel: ChannelConfig {
                break_settle: settings.break_settle(),
                quiet_after: settings.separator_settle(),
            },
        }
    }
}

/// Platform services the manager is built on
pub struct Collaborators {
    pub adapter: Arc<dyn BluetoothAdapter>,
    pub connector: Arc<dyn Connector>,
    pub prefs: Arc<dyn Preferences>,
    pub performer: Arc<dyn ActionPerformer>,
    pub status: Arc<dyn StatusSink>,
}

/// Connection manager for one bus adapter
///
/// Dropping the manager shuts it down.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(collaborators: Collaborators, config: ManagerConfig) -> Self {
        let (closed, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            adapter: collaborators.adapter,
            connector: collaborators.connector,
            prefs: collaborators.prefs,
            performer: collaborators.performer,
            status: collaborators.status,
            config,
            shared: Mutex::new(Shared::default()),
            closed,
        });

        inner.set_notice(&mut inner.lock(), Some(MSG_STARTING), None);
        Self { inner }
    }

    /// Tear down whatever is running and start connecting from scratch
    pub fn start(&self) {
        let mut shared = self.inner.lock();
        self.inner.start(&mut shared);
    }

    /// Start only if not already connected
    pub fn ensure_started(&self) {
        let mut shared = self.inner.lock();
        if !shared.state.is_connected() {
            self.inner.start(&mut shared);
        }
    }

    /// Stop for good; idempotent
    pub fn shutdown(&self) {
        let mut shared = self.inner.lock();
        if shared.state == ConnectionState::Destroying {
            return;
        }
        info!("Shutting down connection manager");
        shared.state = ConnectionState::Destroying;
        self.inner.set_notice(&mut shared, Some(MSG_STOPPED), None);
        self.inner.stop(&mut shared);
    }

    /// Resolves once [`shutdown`](Self::shutdown) has completed
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        // the sender lives as long as the manager
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// React to the radio adapter being switched on or off
    pub fn adapter_state_changed(&self, state: AdapterState) {
        let mut shared = self.inner.lock();
        match state {
            AdapterState::Off | AdapterState::TurningOff => {
                self.inner.bad_config(&mut shared, MSG_NOT_ENABLED)
            }
            AdapterState::On => self.inner.start(&mut shared),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn notice(&self) -> Notice {
        self.inner.lock().notice.clone()
    }

    pub fn register_observer(&self, observer: Box<dyn BusObserver>) -> ObserverId {
        self.inner.lock().observers.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.lock().observers.unregister(id)
    }

    /// Register a channel-backed observer and return its receiving end
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BusData> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_observer(Box::new(tx));
        rx
    }

    /// Send a command right away, bypassing the queue
    pub fn send_command(&self, command: &str) {
        let mut shared = self.inner.lock();
        if !shared.state.is_connected() {
            self.inner.notify_not_ready(&mut shared);
            return;
        }
        self.inner.send_command(&mut shared, command);
    }

    /// Re-send the configured startup commands
    pub fn send_startup_commands(&self) {
        let mut shared = self.inner.lock();
        if !shared.state.is_connected() {
            self.inner.notify_not_ready(&mut shared);
            return;
        }
        self.inner.init_startup_commands(&mut shared);
    }

    /// Queue a command for the next idle link
    pub fn queue_command(&self, command: &str) {
        let mut shared = self.inner.lock();
        self.inner.queue_command(&mut shared, command);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    /// Bumped on every teardown; callbacks carry the session they belong to
    session: u64,
    framer: ResponseFramer,
    observers: ObserverRegistry,
    notice: Notice,
    connect_task: Option<CancellationToken>,
    channel: Option<IoChannel>,
    queue: Option<CommandQueue>,
    processors: HashMap<String, SignalProcessor>,
}

struct Inner {
    adapter: Arc<dyn BluetoothAdapter>,
    connector: Arc<dyn Connector>,
    prefs: Arc<dyn Preferences>,
    performer: Arc<dyn ActionPerformer>,
    status: Arc<dyn StatusSink>,
    config: ManagerConfig,
    shared: Mutex<Shared>,
    closed: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>, shared: &mut Shared) {
        debug!("start()");
        self.cancel_all(shared);

        if shared.state == ConnectionState::Destroying {
            self.stop(shared);
            return;
        }

        if !self.adapter.is_enabled() {
            self.bad_config(shared, MSG_NOT_ENABLED);
            return;
        }

        let address = self.prefs.get_string(KEY_DEVICE_ADDRESS, "");
        let address = address.trim();
        if address.is_empty() {
            self.bad_config(shared, MSG_NOT_CONFIGURED);
            return;
        }

        shared.state = ConnectionState::None;

        match self.adapter.remote_device(address) {
            Some(device) if device.bonded => self.connect(shared, device),
            _ => {
                warn!("Device {} is not paired", address);
                self.bad_config(shared, MSG_NOT_PAIRED);
            }
        }
    }

    fn stop(&self, shared: &mut Shared) {
        debug!("stop()");
        self.cancel_all(shared);

        if shared.state == ConnectionState::Destroying {
            self.closed.send_replace(true);
            return;
        }
        shared.state = ConnectionState::None;
    }

    /// Cancel the connect attempt, I/O channel, command queue and processors, in that order
    fn cancel_all(&self, shared: &mut Shared) {
        shared.session += 1;

        if let Some(connect_task) = shared.connect_task.take() {
            connect_task.cancel();
        }
        if let Some(channel) = shared.channel.take() {
            channel.cancel();
        }
        Self::destroy_queue(shared);
        for (_, processor) in shared.processors.drain() {
            processor.cancel();
        }
        shared.framer.reset();
    }

    /// Report a configuration problem and stop without retrying
    fn bad_config(&self, shared: &mut Shared, error: &str) {
        warn!("Stopping: {}", error);
        self.set_notice(shared, Some(MSG_STOPPED), Some(error));
        self.stop(shared);
    }

    fn connect(self: &Arc<Self>, shared: &mut Shared, device: Device) {
        if shared.state == ConnectionState::Destroying {
            self.stop(shared);
            return;
        }

        let token = CancellationToken::new();
        tokio::spawn(connect_attempt(
            self.clone(),
            device.clone(),
            shared.session,
            token.clone(),
        ));
        shared.connect_task = Some(token);
        shared.state = ConnectionState::Connecting;

        let status = format!("connecting to {}...", device.name);
        self.set_notice(shared, Some(&status), Some(""));
    }

    fn on_connected(self: &Arc<Self>, session: u64, link: Box<dyn Link>, device: Device) {
        let mut shared = self.lock();
        if shared.session != session {
            debug!("Dropping link from a cancelled connect attempt");
            return;
        }
        if shared.state == ConnectionState::Destroying {
            self.stop(&mut shared);
            return;
        }

        info!("Connected to {}", device.name);
        shared.connect_task = None;
        shared.framer.reset();

        let handler = Arc::new(SessionHandler {
            inner: Arc::downgrade(self),
            session,
        });
        shared.channel = Some(IoChannel::open(link, handler, self.config.channel));
        shared.state = ConnectionState::Idle;

        let status = format!("connected to {}", device.name);
        self.set_notice(&mut shared, Some(&status), Some(""));

        self.elm_init(&mut shared);
    }

    fn on_connect_failed(self: &Arc<Self>, session: u64, error: LinkError) {
        let mut shared = self.lock();
        if shared.session != session {
            return;
        }
        warn!("Connect attempt failed: {}", error);
        self.start(&mut shared);
    }

    fn on_data(self: &Arc<Self>, session: u64, data: &[u8]) {
        let mut shared = self.lock();
        if shared.session != session {
            return;
        }

        // stays Receiving until a completed frame ends the chunk
        shared.state = ConnectionState::Receiving;
        let feed = shared.framer.feed(data);
        Self::apply_feed(&mut shared, feed);
    }

    fn on_quiet(self: &Arc<Self>, session: u64) {
        let mut shared = self.lock();
        if shared.session != session || !shared.framer.has_held_separator() {
            return;
        }
        let feed = shared.framer.flush();
        Self::apply_feed(&mut shared, feed);
    }

    fn on_lost(self: &Arc<Self>, session: u64) {
        let mut shared = self.lock();
        if shared.session != session {
            return;
        }
        self.connection_lost(&mut shared);
    }

    fn connection_lost(self: &Arc<Self>, shared: &mut Shared) {
        metrics::counter!("bus_bridge.link_losses_total").increment(1);
        self.set_notice(shared, None, Some(MSG_CONNECTION_LOST));
        self.start(shared);
    }

    fn apply_feed(shared: &mut Shared, feed: Feed) {
        for frame in feed.frames {
            Self::route(shared, frame);
        }
        if feed.idle {
            shared.state = ConnectionState::Idle;
        }
    }

    fn route(shared: &mut Shared, frame: Frame) {
        metrics::counter!("bus_bridge.frames_received_total").increment(1);

        let mut kind = BusDataKind::Rx;
        if let Some(processor) = shared.processors.get(&frame.text) {
            kind = BusDataKind::RxMonitored;
            processor.log_occurrence();
            metrics::counter!("bus_bridge.frames_monitored_total").increment(1);
        }

        debug!("RX {:?} (completed: {})", frame.text, frame.completed);
        shared
            .observers
            .notify(&BusData::new(frame.text, kind, frame.completed));
    }

    fn elm_init(self: &Arc<Self>, shared: &mut Shared) {
        if self.init_processors(shared) {
            self.init_startup_commands(shared);
        }
    }

    fn init_processors(&self, shared: &mut Shared) -> bool {
        let mut processors = HashMap::new();

        for slot in 1..=MONITOR_SLOTS {
            let definition = self.prefs.get_string(&monitor_key(slot), "");
            if definition.trim().is_empty() {
                continue;
            }

            let spawned = Signal::parse(&definition)
                .and_then(|signal| SignalProcessor::spawn(signal, self.performer.clone()));

            match spawned {
                Ok(processor) => {
                    let pattern = processor.signal().pattern.clone();
                    if let Some(replaced) = processors.insert(pattern, processor) {
                        replaced.cancel();
                    }
                }
                Err(e) => {
                    warn!("Monitor #{} is invalid: {}", slot, e);
                    self.bad_config(shared, MSG_MONITORS_NOT_CONFIGURED);
                    return false;
                }
            }
        }

        if processors.is_empty() {
            warn!("No bus monitors configured");
            self.bad_config(shared, MSG_MONITORS_NOT_CONFIGURED);
            return false;
        }

        info!("Monitoring {} bus messages", processors.len());
        shared.processors = processors;
        true
    }

    fn init_startup_commands(self: &Arc<Self>, shared: &mut Shared) {
        let commands = split_startup_commands(&self.prefs.get_string(KEY_STARTUP_COMMANDS, ""));
        if commands.is_empty() {
            warn!("No startup commands configured");
            self.bad_config(shared, MSG_COMMANDS_NOT_CONFIGURED);
            return;
        }

        Self::destroy_queue(shared);
        Self::write_break(shared);

        for command in &commands {
            self.queue_command(shared, command);
        }
    }

    fn queue_command(self: &Arc<Self>, shared: &mut Shared, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }

        let queue = shared.queue.get_or_insert_with(|| {
            let sink = Arc::new(QueueSink {
                inner: Arc::downgrade(self),
                session: shared.session,
            });
            CommandQueue::spawn(sink, self.config.queue_busy_wait)
        });
        queue.enqueue(command);
    }

    fn send_command(self: &Arc<Self>, shared: &mut Shared, command: &str) {
        if command.is_empty() {
            return;
        }

        let connected = shared.state.is_connected() && shared.channel.is_some();
        if !connected {
            warn!("Cannot send {}: not connected", command);
            self.connection_lost(shared);
            return;
        }

        shared.observers.notify(&BusData::tx(command));

        if shared.state != ConnectionState::Idle {
            // abort whatever response is still in flight
            Self::write_break(shared);
        }

        // no response means no way back to Idle
        shared.state = ConnectionState::Transmitting;
        if let Some(channel) = &shared.channel {
            trace!("TX {}", command);
            channel.write(encode_command(command));
            metrics::counter!("bus_bridge.commands_sent_total").increment(1);
        }
    }

    fn write_break(shared: &Shared) {
        if let Some(channel) = &shared.channel {
            channel.write_break();
        }
    }

    fn destroy_queue(shared: &mut Shared) {
        if let Some(queue) = shared.queue.take() {
            queue.cancel();
        }
    }

    fn notify_not_ready(&self, shared: &mut Shared) {
        let text = format!("{} | {}", MSG_NOT_READY, shared.notice.text());
        shared.observers.notify(&BusData::error(text));
    }

    fn set_notice(&self, shared: &mut Shared, status: Option<&str>, error: Option<&str>) {
        if let Some(status) = status {
            shared.notice.status = status.to_string();
            self.status.set_status(status);
        }
        if let Some(error) = error {
            shared.notice.error = error.to_string();
            self.status.set_error(error);
        }
    }
}

async fn connect_attempt(inner: Arc<Inner>, device: Device, session: u64, cancel: CancellationToken) {
    // never hammer the radio stack, however we got here
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(inner.config.connect_retry_wait) => {}
    }

    debug!("Connecting to {}", device.address);
    metrics::counter!("bus_bridge.connect_attempts_total").increment(1);

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = inner.connector.connect(&device) => result,
    };

    match result {
        Ok(link) => inner.on_connected(session, link, device),
        Err(e) => inner.on_connect_failed(session, e),
    }
}

struct SessionHandler {
    inner: Weak<Inner>,
    session: u64,
}

impl LinkHandler for SessionHandler {
    fn on_data(&self, data: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_data(self.session, data);
        }
    }

    fn on_quiet(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_quiet(self.session);
        }
    }

    fn on_lost(&self, error: LinkError) {
        debug!("Session {} lost: {}", self.session, error);
        if let Some(inner) = self.inner.upgrade() {
            inner.on_lost(self.session);
        }
    }
}

struct QueueSink {
    inner: Weak<Inner>,
    session: u64,
}

impl CommandSink for QueueSink {
    fn try_transmit(&self, command: String) -> Result<(), String> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(command);
        };

        // the Idle check and the send share one lock
        let mut shared = inner.lock();
        if shared.session != self.session || shared.state != ConnectionState::Idle {
            return Err(command);
        }
        inner.send_command(&mut shared, &command);
        Ok(())
    }
}
