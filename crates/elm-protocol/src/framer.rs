//! Response Framer
//!
//! Folds raw serial chunks into frames. A frame is the text between two
//! separators; it is `completed` when the separator that ended it contains
//! the `>` prompt, i.e. the adapter has finished the whole response.

use std::sync::OnceLock;

use regex::Regex;

use crate::protocol::RESPONSE_TERMINATOR;

/// Separator alternatives, tried in order at the leftmost match position:
/// the prompt with surrounding whitespace, a line break run, a bare prompt.
const SEPARATOR_PATTERN: &str = r" *\r*\n* *> *\r*\n* *| *\r+\n* *\r*\n* *|>";

fn separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(SEPARATOR_PATTERN).expect("separator pattern is valid"))
}

/// One delimited unit of response text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message text with line breaks removed and outer whitespace trimmed
    pub text: String,
    /// Whether the response terminator ended this frame
    pub completed: bool,
}

impl Frame {
    fn from_raw(raw: &str, completed: bool) -> Self {
        let text: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        Self {
            // control characters (echoed breaks included) count as whitespace here
            text: text.trim_matches(|c: char| c <= ' ').to_string(),
            completed,
        }
    }
}

/// Result of folding one chunk into the framer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Frames completed by this chunk, in stream order
    pub frames: Vec<Frame>,
    /// The chunk ended cleanly on a terminator with nothing left buffered
    pub idle: bool,
}

/// Accumulates serial data and splits it into [`Frame`]s
#[derive(Debug, Default)]
pub struct ResponseFramer {
    buffer: String,
    held: bool,
}

impl ResponseFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a chunk of raw bytes into the buffer and extract any frames
    ///
    /// A line separator that ends exactly at the end of the buffered data is
    /// held back, since the next chunk may extend it into a terminator
    /// (`\r` followed by `>`). Call [`flush`](Self::flush) once the line has
    /// gone quiet to release it.
    pub fn feed(&mut self, data: &[u8]) -> Feed {
        // ELM output is ASCII; mapping bytes one-to-one keeps chunk
        // boundaries from ever splitting a character
        self.buffer.extend(data.iter().map(|&b| char::from(b)));
        self.extract(false)
    }

    /// Release a held separator as a non-completed frame
    ///
    /// A prompt that shows up after the flush no longer completes that text:
    /// it arrives as its own empty completed frame, so a reply whose final
    /// `\r` and `>` straddle the quiet period is reported in two parts.
    pub fn flush(&mut self) -> Feed {
        if !self.held {
            return Feed::default();
        }
        self.extract(true)
    }

    /// Whether a trailing separator is waiting on more data
    pub fn has_held_separator(&self) -> bool {
        self.held
    }

    /// Whether any unframed data is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered data
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.held = false;
    }

    fn extract(&mut self, release_held: bool) -> Feed {
        let mut feed = Feed::default();
        let mut consumed = 0;
        self.held = false;

        while let Some(found) = separator().find_at(&self.buffer, consumed) {
            let completed = found.as_str().contains(RESPONSE_TERMINATOR);

            if !completed && found.end() == self.buffer.len() && !release_held {
                self.held = true;
                break;
            }

            feed.frames
                .push(Frame::from_raw(&self.buffer[consumed..found.start()], completed));
            consumed = found.end();
            feed.idle = completed && consumed == self.buffer.len();
        }

        self.buffer.drain(..consumed);
        feed
    }
}
