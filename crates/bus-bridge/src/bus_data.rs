//! Bus Data and Observers
//!
//! Every frame that crosses the link, in either direction, is announced to
//! registered observers as a [`BusData`]. Observers that have gone away are
//! dropped from the registry on the next notify.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// What a [`BusData`] frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusDataKind {
    /// Error or not-ready notice
    Error,
    /// Command sent to the adapter
    Tx,
    /// Response frame from the adapter
    Rx,
    /// Response frame matching a configured signal
    RxMonitored,
}

/// A frame announced to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusData {
    pub text: String,
    pub kind: BusDataKind,
    /// Whether the frame ended with the response terminator
    pub completed: bool,
    pub at: DateTime<Utc>,
}

impl BusData {
    pub fn new(text: impl Into<String>, kind: BusDataKind, completed: bool) -> Self {
        Self {
            text: text.into(),
            kind,
            completed,
            at: Utc::now(),
        }
    }

    pub fn tx(command: &str) -> Self {
        Self::new(command, BusDataKind::Tx, false)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, BusDataKind::Error, false)
    }
}

/// The observer can no longer receive frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverGone;

/// Receives every announced frame
pub trait BusObserver: Send + Sync {
    fn notify(&self, data: &BusData) -> Result<(), ObserverGone>;
}

impl BusObserver for mpsc::UnboundedSender<BusData> {
    fn notify(&self, data: &BusData) -> Result<(), ObserverGone> {
        self.send(data.clone()).map_err(|_| ObserverGone)
    }
}

/// Handle returned by registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registered observers in registration order
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<(ObserverId, Box<dyn BusObserver>)>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn BusObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        debug!("Observer {:?} registered ({} total)", id, self.observers.len());
        id
    }

    /// Returns whether the observer was registered
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        before != self.observers.len()
    }

    /// Deliver to every observer, dropping the ones that are gone
    pub fn notify(&mut self, data: &BusData) {
        self.observers.retain(|(id, observer)| match observer.notify(data) {
            Ok(()) => true,
            Err(ObserverGone) => {
                debug!("Observer {:?} gone, unregistering", id);
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_reaches_all_observers() {
        let mut registry = ObserverRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(Box::new(tx1));
        registry.register(Box::new(tx2));

        registry.notify(&BusData::tx("ATZ"));

        assert_eq!(rx1.try_recv().unwrap().text, "ATZ");
        assert_eq!(rx2.try_recv().unwrap().kind, BusDataKind::Tx);
    }

    #[test]
    fn test_gone_observer_is_dropped() {
        let mut registry = ObserverRegistry::new();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(Box::new(tx1));
        registry.register(Box::new(tx2));
        drop(rx1);

        registry.notify(&BusData::new("41 0C 1A F8", BusDataKind::Rx, true));

        assert_eq!(registry.len(), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_unregister() {
        let mut registry = ObserverRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(Box::new(tx));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&BusData::error("x"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_serializes_kind_in_caps() {
        let json = serde_json::to_string(&BusData::new("3E8 01", BusDataKind::RxMonitored, true)).unwrap();
        assert!(json.contains("\"kind\":\"RX_MONITORED\""));
        assert!(json.contains("\"text\":\"3E8 01\""));
    }
}
