//! Stderr draining: line framing, severity routing, bounded retention.
//!
//! The supervisor reads the agent process's stderr through a
//! [`tokio_util::codec::FramedRead`] backed by [`StderrCodec`], which caps
//! line length before any allocation for retention. Each line is classified
//! by its leading severity token and routed to `tracing` at the matching
//! level; the most recent lines are kept in a bounded ring buffer so
//! failure reports can attach them.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, trace, warn};

use crate::session::SessionId;

/// Line codec for agent stderr with a fixed maximum line length.
///
/// Overlong lines surface as a decode error; [`LinesCodec`] then discards
/// until the next newline, so the drain keeps going afterwards.
#[derive(Debug)]
pub struct StderrCodec(LinesCodec);

impl StderrCodec {
    /// Create a codec accepting lines up to `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_line_bytes))
    }
}

impl Decoder for StderrCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::io::Result<Option<String>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> std::io::Error {
    match e {
        LinesCodecError::MaxLineLengthExceeded => std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stderr line exceeded maximum length",
        ),
        LinesCodecError::Io(io_err) => io_err,
    }
}

// ── Severity classification ──────────────────────────────────────────────────

/// Severity parsed from a stderr line's leading tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `ERROR` / `ERR` / `FATAL`.
    Error,
    /// `WARN` / `WARNING`.
    Warn,
    /// `INFO`, and the default for unclassified lines.
    Info,
    /// `DEBUG`.
    Debug,
    /// `TRACE`.
    Trace,
}

/// Classify a stderr line by scanning its first few whitespace-separated
/// tokens for a severity word. Tokens are stripped of surrounding
/// punctuation (`[WARN]`, `ERROR:`) and matched case-insensitively, so
/// timestamped prefixes still classify. Unmatched lines default to `Info`.
#[must_use]
pub fn classify(line: &str) -> Severity {
    for token in line.split_whitespace().take(4) {
        let word: String = token
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        match word.as_str() {
            "ERROR" | "ERR" | "FATAL" => return Severity::Error,
            "WARN" | "WARNING" => return Severity::Warn,
            "INFO" => return Severity::Info,
            "DEBUG" => return Severity::Debug,
            "TRACE" => return Severity::Trace,
            _ => {}
        }
    }
    Severity::Info
}

/// Route one agent stderr line to structured logging at its severity.
pub fn route(id: &SessionId, line: &str) {
    match classify(line) {
        Severity::Error => error!(session_id = %id, "agent: {line}"),
        Severity::Warn => warn!(session_id = %id, "agent: {line}"),
        Severity::Info => info!(session_id = %id, "agent: {line}"),
        Severity::Debug => debug!(session_id = %id, "agent: {line}"),
        Severity::Trace => trace!(session_id = %id, "agent: {line}"),
    }
}

// ── Retention ────────────────────────────────────────────────────────────────

/// Bounded ring buffer of the most recent stderr lines.
#[derive(Debug)]
pub struct RecentStderr {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RecentStderr {
    /// Ring retaining up to `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        let Ok(mut guard) = self.lines.lock() else {
            return;
        };
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(line);
    }

    /// Newline-joined snapshot of the retained lines.
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|guard| guard.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}
