//! I/O Channel
//!
//! Owns an open [`Link`] for the life of one connection. A reader task hands
//! every chunk to the owner's [`LinkHandler`]; a writer task drains queued
//! writes in order so callers never block on the stream. Any stream error is
//! reported as a lost link exactly once; retrying is the owner's business.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::protocol::BREAK;
use crate::transport::Link;

/// Size of the receive buffer handed to each read
pub const READ_BUFFER_SIZE: usize = 1024;

/// Receives events from the channel's reader and writer tasks
pub trait LinkHandler: Send + Sync + 'static {
    /// A chunk of bytes arrived (no framing at this layer)
    fn on_data(&self, data: &[u8]);

    /// No data has arrived for the configured quiet period after a read
    fn on_quiet(&self) {}

    /// The stream failed or closed; called at most once per channel
    fn on_lost(&self, error: LinkError);
}

/// Channel timing
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Pause after a break before the next write goes out
    pub break_settle: Duration,
    /// Silence after a read before [`LinkHandler::on_quiet`] fires
    pub quiet_after: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            break_settle: Duration::from_millis(250),
            quiet_after: Duration::from_millis(30),
        }
    }
}

struct Outbound {
    bytes: Vec<u8>,
    settle: Option<Duration>,
}

/// Exclusive owner of an open link
pub struct IoChannel {
    writes: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    config: ChannelConfig,
}

impl IoChannel {
    /// Take ownership of a connected link and start its reader and writer tasks
    pub fn open(link: Box<dyn Link>, handler: Arc<dyn LinkHandler>, config: ChannelConfig) -> Self {
        debug!("Opening I/O channel");

        let (reader, writer) = tokio::io::split(link);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));

        let reporter = LossReporter {
            handler: handler.clone(),
            lost,
            cancel: cancel.clone(),
        };

        tokio::spawn(read_loop(
            reader,
            handler,
            reporter.clone(),
            cancel.clone(),
            config.quiet_after,
        ));
        tokio::spawn(write_loop(writer, rx, reporter, cancel.clone()));

        Self {
            writes: tx,
            cancel,
            config,
        }
    }

    /// Queue bytes for a write followed by a flush
    pub fn write(&self, bytes: Vec<u8>) {
        self.enqueue(Outbound {
            bytes,
            settle: None,
        });
    }

    /// Queue a single break byte; later writes wait for the settle period
    pub fn write_break(&self) {
        self.enqueue(Outbound {
            bytes: vec![BREAK],
            settle: Some(self.config.break_settle),
        });
    }

    /// Close the link, unblocking any pending read or write
    ///
    /// Safe to call repeatedly; a cancelled channel never reports a loss.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling I/O channel");
            self.cancel.cancel();
        }
    }

    /// Whether the channel has been cancelled or has lost its link
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn enqueue(&self, outbound: Outbound) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.writes.send(outbound).is_err() {
            debug!("Write dropped: writer task has exited");
        }
    }
}

impl Drop for IoChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
struct LossReporter {
    handler: Arc<dyn LinkHandler>,
    lost: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl LossReporter {
    fn report(&self, error: LinkError) {
        if self.cancel.is_cancelled() || self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Link lost: {}", error);
        self.cancel.cancel();
        self.handler.on_lost(error);
    }
}

async fn read_loop(
    mut reader: ReadHalf<Box<dyn Link>>,
    handler: Arc<dyn LinkHandler>,
    reporter: LossReporter,
    cancel: CancellationToken,
    quiet_after: Duration,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut quiet_deadline: Option<Instant> = None;

    loop {
        let deadline = quiet_deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Read loop cancelled");
                return;
            }
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    reporter.report(LinkError::Closed);
                    return;
                }
                Ok(n) => {
                    trace!("Read {} bytes", n);
                    handler.on_data(&buffer[..n]);
                    quiet_deadline = Some(Instant::now() + quiet_after);
                }
                Err(e) => {
                    reporter.report(LinkError::Io(e));
                    return;
                }
            },
            _ = tokio::time::sleep_until(deadline), if quiet_deadline.is_some() => {
                quiet_deadline = None;
                handler.on_quiet();
            }
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<Box<dyn Link>>,
    mut writes: mpsc::UnboundedReceiver<Outbound>,
    reporter: LossReporter,
    cancel: CancellationToken,
) {
    loop {
        let outbound = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            next = writes.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
        };

        trace!("Writing {} bytes", outbound.bytes.len());

        let result = async {
            writer.write_all(&outbound.bytes).await?;
            writer.flush().await
        };

        let written = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            written = result => written,
        };

        if let Err(e) = written {
            reporter.report(LinkError::Io(e));
            return;
        }

        if let Some(settle) = outbound.settle {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(settle) => {}
            }
        }
    }

    debug!("Write loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<u8>>,
        quiet: Mutex<usize>,
        lost: Mutex<Vec<String>>,
    }

    impl LinkHandler for Recorder {
        fn on_data(&self, data: &[u8]) {
            self.data.lock().unwrap().extend_from_slice(data);
        }

        fn on_quiet(&self) {
            *self.quiet.lock().unwrap() += 1;
        }

        fn on_lost(&self, error: LinkError) {
            self.lost.lock().unwrap().push(error.to_string());
        }
    }

    fn open_pair() -> (IoChannel, Arc<Recorder>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(256);
        let recorder = Arc::new(Recorder::default());
        let channel = IoChannel::open(Box::new(local), recorder.clone(), ChannelConfig::default());
        (channel, recorder, remote)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reads_are_forwarded() {
        let (_channel, recorder, mut remote) = open_pair();

        remote.write_all(b"41 0C 1A F8\r>").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(recorder.data.lock().unwrap().as_slice(), b"41 0C 1A F8\r>");
        assert_eq!(*recorder.quiet.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_writes_go_out_in_order() {
        let (channel, _recorder, mut remote) = open_pair();

        channel.write(b"ATZ\r\n".to_vec());
        channel.write(b"ATE0\r\n".to_vec());

        let mut received = vec![0u8; 11];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"ATZ\r\nATE0\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_delays_next_write() {
        let (channel, _recorder, mut remote) = open_pair();

        let started = Instant::now();
        channel.write_break();
        channel.write(b"ATMA\r\n".to_vec());

        let mut received = vec![0u8; 7];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"\0ATMA\r\n");
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_remote_close_reported_once() {
        let (channel, recorder, remote) = open_pair();

        drop(remote);
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.write(b"ATZ\r\n".to_vec());
        settle().await;

        assert_eq!(recorder.lost.lock().unwrap().len(), 1);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_silent() {
        let (channel, recorder, _remote) = open_pair();

        channel.cancel();
        channel.cancel();
        channel.write(b"ATZ\r\n".to_vec());
        settle().await;

        assert!(channel.is_closed());
        assert!(recorder.lost.lock().unwrap().is_empty());
    }
}
