//! Occurrence Log and Classification
//!
//! Each signal keeps an append-only log of when its message was seen. The
//! newest entry is re-evaluated against everything since the last entry that
//! was acted upon; once it is classified as something worth acting on, the
//! caller fires the action and the log is trimmed so the acted entry becomes
//! the new head.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::signal::{ClassifierMode, Signal};

/// Outcome of classifying one occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// Not decided yet; more occurrences may follow
    Unknown,
    /// Suppressed as a bounce after a recent action
    Ignored,
    /// Short press
    Short,
    /// Long press
    Long,
}

/// One observation of a signal's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// When the message was seen; `None` for the seed entry
    pub at: Option<Instant>,
    pub classification: Classification,
    pub should_act: bool,
    pub acted: bool,
}

impl Occurrence {
    fn seen(at: Instant) -> Self {
        Self {
            at: Some(at),
            classification: Classification::Unknown,
            should_act: false,
            acted: false,
        }
    }

    /// Seed entry: acted upon at the beginning of time
    fn seed() -> Self {
        Self {
            at: None,
            classification: Classification::Ignored,
            should_act: false,
            acted: true,
        }
    }
}

/// Facts about the occurrences since the last acted-upon entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    since_acted: Duration,
    since_first_unknown: Duration,
    unknowns: usize,
    unknown_span: Duration,
}

/// Occurrence log for one signal
#[derive(Debug, Clone)]
pub struct OccurrenceLog {
    entries: Vec<Occurrence>,
    mode: ClassifierMode,
    ignore_after_action: Duration,
    short_window: Duration,
    long_window: Duration,
    long_watch: Duration,
}

impl OccurrenceLog {
    /// Create a log seeded with an acted-upon entry
    pub fn new(signal: &Signal) -> Self {
        Self {
            entries: vec![Occurrence::seed()],
            mode: signal.mode(),
            ignore_after_action: signal.ignore_after_action(),
            short_window: signal.short_window(),
            long_window: signal.long_window(),
            long_watch: signal.long_watch(),
        }
    }

    /// Append an unclassified occurrence
    pub fn record(&mut self, at: Instant) {
        self.entries.push(Occurrence::seen(at));
    }

    /// Number of entries, seed or head included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The log always holds at least its head entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry
    pub fn latest(&self) -> Option<&Occurrence> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[Occurrence] {
        &self.entries
    }

    /// Classify pending occurrences and claim the ones that should act now
    ///
    /// Each returned classification must be dispatched exactly once; the
    /// claimed entries are already marked acted and the log is trimmed.
    pub fn take_due(&mut self, now: Instant) -> Vec<Classification> {
        if self.mode == ClassifierMode::PassThrough {
            return self.take_all_pending();
        }

        let Some(index) = self.analyze_latest(now) else {
            return Vec::new();
        };

        let entry = &mut self.entries[index];
        if !entry.should_act || entry.acted {
            return Vec::new();
        }

        entry.acted = true;
        let classification = entry.classification;
        self.entries.drain(..index);
        vec![classification]
    }

    /// Classify the newest entry and return its index
    pub fn analyze_latest(&mut self, now: Instant) -> Option<usize> {
        let index = self.entries.len().checked_sub(1)?;
        if self.entries[index].classification != Classification::Unknown {
            return Some(index);
        }

        let classification = match self.mode {
            ClassifierMode::PassThrough => Classification::Short,
            _ => self.classify(now, index),
        };
        trace!("Occurrence {} classified {:?}", index, classification);

        let entry = &mut self.entries[index];
        entry.classification = classification;
        entry.should_act = matches!(classification, Classification::Short | Classification::Long);
        Some(index)
    }

    fn take_all_pending(&mut self) -> Vec<Classification> {
        let mut due = Vec::new();
        let mut last_acted = 0;

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.classification == Classification::Unknown {
                entry.classification = Classification::Short;
                entry.should_act = true;
            }
            if entry.should_act && !entry.acted {
                entry.acted = true;
                due.push(entry.classification);
            }
            if entry.acted {
                last_acted = index;
            }
        }

        self.entries.drain(..last_acted);
        due
    }

    fn classify(&self, now: Instant, index: usize) -> Classification {
        let window = self.window(now, index);

        if !self.ignore_after_action.is_zero() && window.since_acted <= self.ignore_after_action {
            return Classification::Ignored;
        }

        match self.mode {
            ClassifierMode::PassThrough => Classification::Short,
            ClassifierMode::Watch => {
                if window.since_first_unknown < self.long_watch {
                    Classification::Unknown
                } else if window.unknowns > 1 && window.unknown_span >= self.long_window {
                    Classification::Long
                } else {
                    // the watch timed out, so at least a short press
                    Classification::Short
                }
            }
            ClassifierMode::LongOnly => {
                if window.unknowns > 0 && window.since_first_unknown >= self.long_window {
                    Classification::Long
                } else {
                    Classification::Unknown
                }
            }
            ClassifierMode::ShortOnly => {
                if window.unknowns > 0 && window.since_first_unknown >= self.short_window {
                    Classification::Short
                } else {
                    Classification::Unknown
                }
            }
        }
    }

    fn window(&self, now: Instant, index: usize) -> Window {
        let mut window = Window {
            since_acted: Duration::MAX,
            since_first_unknown: Duration::ZERO,
            unknowns: 0,
            unknown_span: Duration::ZERO,
        };
        let mut newest_unknown: Option<Instant> = None;

        for entry in self.entries[..=index].iter().rev() {
            if entry.classification == Classification::Unknown {
                if let Some(at) = entry.at {
                    let newest = *newest_unknown.get_or_insert(at);
                    window.unknowns += 1;
                    window.since_first_unknown = now.saturating_duration_since(at);
                    window.unknown_span = newest.saturating_duration_since(at);
                }
            }

            if entry.acted {
                if let Some(at) = entry.at {
                    window.since_acted = now.saturating_duration_since(at);
                }
                break;
            }
        }

        window
    }
}
