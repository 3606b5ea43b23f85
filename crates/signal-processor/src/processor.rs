//! Signal Processor
//!
//! One periodic task per signal. The connection side logs occurrences as
//! matching frames arrive; the task re-evaluates the occurrence log every
//! [`TICK`] and dispatches each due action exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::action::ActionPerformer;
use crate::error::SignalError;
use crate::occurrence::{Classification, OccurrenceLog};
use crate::signal::{Signal, TICK};

/// Name used as the source of action failure alerts
pub const APP_NAME: &str = "bus-bridge";

/// Handle to a running signal processor task
pub struct SignalProcessor {
    signal: Arc<Signal>,
    log: Arc<Mutex<OccurrenceLog>>,
    cancel: CancellationToken,
}

impl SignalProcessor {
    /// Validate the signal and start its ticking task
    pub fn spawn(signal: Signal, performer: Arc<dyn ActionPerformer>) -> Result<Self, SignalError> {
        signal.validate()?;

        info!(
            "Starting signal processor for '{}' ({:?})",
            signal.pattern,
            signal.mode()
        );

        let signal = Arc::new(signal);
        let log = Arc::new(Mutex::new(OccurrenceLog::new(&signal)));
        let cancel = CancellationToken::new();

        tokio::spawn(tick_loop(
            signal.clone(),
            log.clone(),
            performer,
            cancel.clone(),
        ));

        Ok(Self {
            signal,
            log,
            cancel,
        })
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Whether a frame is an occurrence of this signal
    pub fn matches(&self, text: &str) -> bool {
        self.signal.pattern == text
    }

    /// Record an occurrence now; ignored once cancelled
    pub fn log_occurrence(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        trace!("Occurrence of '{}'", self.signal.pattern);
        lock(&self.log).record(Instant::now().into_std());
    }

    /// Stop the ticking task; idempotent
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelling signal processor for '{}'", self.signal.pattern);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SignalProcessor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(log: &Mutex<OccurrenceLog>) -> MutexGuard<'_, OccurrenceLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn tick_loop(
    signal: Arc<Signal>,
    log: Arc<Mutex<OccurrenceLog>>,
    performer: Arc<dyn ActionPerformer>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let due = lock(&log).take_due(Instant::now().into_std());
                for classification in due {
                    // actions may run for a while; the next tick must not wait
                    tokio::spawn(dispatch(signal.clone(), performer.clone(), classification));
                }
            }
        }
    }

    debug!("Signal processor for '{}' stopped", signal.pattern);
}

async fn dispatch(
    signal: Arc<Signal>,
    performer: Arc<dyn ActionPerformer>,
    classification: Classification,
) {
    let Some(action) = signal.action_for(classification) else {
        debug!(
            "'{}' classified {:?} with no action configured",
            signal.pattern, classification
        );
        return;
    };

    info!("'{}' classified {:?}: {}", signal.pattern, classification, action);
    metrics::counter!("bus_bridge.actions_dispatched_total").increment(1);

    if let Err(e) = performer.perform_action(action).await {
        warn!("Action '{}' failed: {}", action, e);
        metrics::counter!("bus_bridge.action_failures_total").increment(1);

        if !signal.silent_errors {
            performer.alert(&format!("{}: error attempting action {}", APP_NAME, action));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct MockPerformer {
        fail: bool,
        delay: Duration,
        actions: Mutex<Vec<String>>,
        alerts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionPerformer for MockPerformer {
        async fn perform_action(&self, spec: &str) -> Result<(), ActionError> {
            self.actions.lock().unwrap().push(spec.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(ActionError::Failed("boom".to_string()))
            } else {
                Ok(())
            }
        }

        fn alert(&self, text: &str) {
            self.alerts.lock().unwrap().push(text.to_string());
        }
    }

    fn spawn(definition: &str, performer: &Arc<MockPerformer>) -> SignalProcessor {
        let signal = Signal::parse(definition).unwrap();
        SignalProcessor::spawn(signal, performer.clone()).unwrap()
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_through_fires_each_occurrence() {
        let performer = Arc::new(MockPerformer::default());
        let processor = spawn("3E8 01|false|0|0|0|0|next|", &performer);

        processor.log_occurrence();
        advance(40).await;
        processor.log_occurrence();
        advance(40).await;

        assert_eq!(*performer.actions.lock().unwrap(), vec!["next", "next"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_action_does_not_delay_next_occurrence() {
        let performer = Arc::new(MockPerformer {
            delay: Duration::from_secs(2),
            ..Default::default()
        });
        let processor = spawn("3E8 01|false|0|0|0|0|slow|", &performer);

        processor.log_occurrence();
        advance(100).await;
        assert_eq!(performer.actions.lock().unwrap().len(), 1);

        processor.log_occurrence();
        advance(40).await;
        assert_eq!(*performer.actions.lock().unwrap(), vec!["slow", "slow"]);

        // cancel is seen while the actions are still running
        processor.cancel();
        processor.log_occurrence();
        advance(100).await;
        assert_eq!(performer.actions.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_resolves_at_deadline() {
        let performer = Arc::new(MockPerformer::default());
        let processor = spawn("3E8 01|false|0|0|500|1000|short|long", &performer);

        processor.log_occurrence();
        advance(600).await;
        processor.log_occurrence();
        advance(300).await;
        assert!(performer.actions.lock().unwrap().is_empty());

        advance(200).await;
        assert_eq!(*performer.actions.lock().unwrap(), vec!["long"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_raises_alert_unless_silent() {
        let performer = Arc::new(MockPerformer {
            fail: true,
            ..Default::default()
        });
        let loud = spawn("A|false|0|0|0|0|do-thing|", &performer);
        let quiet = spawn("B|true|0|0|0|0|other-thing|", &performer);

        loud.log_occurrence();
        quiet.log_occurrence();
        advance(40).await;

        assert_eq!(performer.actions.lock().unwrap().len(), 2);
        assert_eq!(
            *performer.alerts.lock().unwrap(),
            vec!["bus-bridge: error attempting action do-thing"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch() {
        let performer = Arc::new(MockPerformer::default());
        let processor = spawn("A|false|0|100|0|0|short|", &performer);

        processor.log_occurrence();
        processor.cancel();
        processor.cancel();
        processor.log_occurrence();
        advance(300).await;

        assert!(processor.is_cancelled());
        assert!(performer.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_timing_rejected() {
        let performer: Arc<dyn ActionPerformer> = Arc::new(MockPerformer::default());
        let signal = Signal {
            pattern: "A".to_string(),
            silent_errors: false,
            ignore_after_action_ms: 0,
            short_window_ms: 10,
            long_window_ms: 0,
            long_watch_ms: 0,
            short_action: "x".to_string(),
            long_action: String::new(),
        };

        assert!(matches!(
            SignalProcessor::spawn(signal, performer),
            Err(SignalError::WindowTooShort { field: "shortWindowMs", .. })
        ));
    }

    #[tokio::test]
    async fn test_matches_exact_text() {
        let performer = Arc::new(MockPerformer::default());
        let processor = spawn("3E8 02 01 00|false|0|0|0|0|x|", &performer);

        assert!(processor.matches("3E8 02 01 00"));
        assert!(!processor.matches("3E8 02 01 00 FF"));
    }
}
