//! Command Queue
//!
//! FIFO of commands waiting for the link to go idle. A single worker takes
//! the next command and offers it to the sink, which only accepts it while
//! the connection is [`Idle`](crate::ConnectionState::Idle); a refused
//! command is offered again after the busy wait. There is no capacity limit
//! and nothing is dropped; commands queued while disconnected wait for the
//! next idle link.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where queued commands go
pub trait CommandSink: Send + Sync + 'static {
    /// Send `command` if the connection is Idle, checking and sending as one
    /// step; otherwise hand it back untouched
    fn try_transmit(&self, command: String) -> Result<(), String>;
}

/// Handle to a running queue worker
pub struct CommandQueue {
    commands: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl CommandQueue {
    /// Start a worker feeding `sink`, polling every `busy_wait` while not idle
    pub fn spawn(sink: Arc<dyn CommandSink>, busy_wait: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run(sink, rx, busy_wait, cancel.clone()));

        Self {
            commands: tx,
            cancel,
        }
    }

    /// Append a command; dropped silently once cancelled
    pub fn enqueue(&self, command: impl Into<String>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let command = command.into();
        trace!("Queued command {}", command);
        if self.commands.send(command).is_err() {
            debug!("Command dropped: queue worker has exited");
        }
    }

    /// Stop the worker and discard pending commands; idempotent
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling command queue");
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    sink: Arc<dyn CommandSink>,
    mut commands: mpsc::UnboundedReceiver<String>,
    busy_wait: Duration,
    cancel: CancellationToken,
) {
    debug!("Command queue started");

    'worker: loop {
        let mut command = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            next = commands.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };

        loop {
            if cancel.is_cancelled() {
                break 'worker;
            }
            match sink.try_transmit(command) {
                Ok(()) => break,
                Err(refused) => command = refused,
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break 'worker,
                _ = tokio::time::sleep(busy_wait) => {}
            }
        }
    }

    debug!("Command queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use std::sync::Mutex;

    struct MockSink {
        state: Mutex<ConnectionState>,
        sent: Mutex<Vec<String>>,
        refused: Mutex<Vec<String>>,
        busy_after_send: bool,
    }

    impl MockSink {
        fn new(state: ConnectionState, busy_after_send: bool) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                sent: Mutex::new(Vec::new()),
                refused: Mutex::new(Vec::new()),
                busy_after_send,
            })
        }

        fn set_state(&self, state: ConnectionState) {
            *self.state.lock().unwrap() = state;
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl CommandSink for MockSink {
        fn try_transmit(&self, command: String) -> Result<(), String> {
            let mut state = self.state.lock().unwrap();
            if *state != ConnectionState::Idle {
                self.refused.lock().unwrap().push(command.clone());
                return Err(command);
            }
            self.sent.lock().unwrap().push(command);
            if self.busy_after_send {
                *state = ConnectionState::Transmitting;
            }
            Ok(())
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_sent_in_order() {
        let sink = MockSink::new(ConnectionState::Idle, false);
        let queue = CommandQueue::spawn(sink.clone(), Duration::from_millis(100));

        queue.enqueue("ATZ");
        queue.enqueue("ATE0");
        queue.enqueue("ATMA");
        advance(10).await;

        assert_eq!(sink.sent(), vec!["ATZ", "ATE0", "ATMA"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_idle() {
        let sink = MockSink::new(ConnectionState::None, false);
        let queue = CommandQueue::spawn(sink.clone(), Duration::from_millis(100));

        queue.enqueue("ATZ");
        advance(500).await;
        assert!(sink.sent().is_empty());

        sink.set_state(ConnectionState::Idle);
        advance(150).await;
        assert_eq!(sink.sent(), vec!["ATZ"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_command_per_idle_period() {
        let sink = MockSink::new(ConnectionState::Idle, true);
        let queue = CommandQueue::spawn(sink.clone(), Duration::from_millis(100));

        queue.enqueue("ATZ");
        queue.enqueue("ATE0");
        advance(300).await;
        assert_eq!(sink.sent(), vec!["ATZ"]);

        sink.set_state(ConnectionState::Idle);
        advance(150).await;
        assert_eq!(sink.sent(), vec!["ATZ", "ATE0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_command_is_offered_again_in_order() {
        let sink = MockSink::new(ConnectionState::Receiving, true);
        let queue = CommandQueue::spawn(sink.clone(), Duration::from_millis(100));

        queue.enqueue("ATZ");
        queue.enqueue("ATE0");
        advance(250).await;
        assert!(sink.sent().is_empty());
        assert!(sink.refused.lock().unwrap().iter().all(|c| c == "ATZ"));

        sink.set_state(ConnectionState::Idle);
        advance(100).await;
        assert_eq!(sink.sent(), vec!["ATZ"]);

        // the sink went busy on send, so the next command is held back
        advance(300).await;
        assert_eq!(sink.sent(), vec!["ATZ"]);
        assert_eq!(sink.refused.lock().unwrap().last().map(String::as_str), Some("ATE0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending() {
        let sink = MockSink::new(ConnectionState::Receiving, false);
        let queue = CommandQueue::spawn(sink.clone(), Duration::from_millis(100));

        queue.enqueue("ATZ");
        queue.cancel();
        queue.cancel();
        queue.enqueue("ATE0");
        sink.set_state(ConnectionState::Idle);
        advance(300).await;

        assert!(queue.is_cancelled());
        assert!(sink.sent().is_empty());
    }
}
