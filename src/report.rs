//! Report formatting for first-seen call paths and registry dumps
//!
//! Frame text is joined one frame per line, immediate caller first. The
//! load-address annotation produced by symbolization (` [0x7f..]`) is
//! stripped from each frame before joining.
//!
//! Reports are bounded: when the next frame would not fit in the declared
//! capacity, formatting stops and [`TRUNCATION_MARKER`] is appended. Once
//! it is clear the frames will not all fit, a frame is only accepted if the
//! marker still fits after it, so the text never exceeds the capacity.

use crate::error::Result;
use crate::path_hash::Fingerprint;
use crate::registry::{Registry, RegistryStats, VisitRecord};
use serde::Serialize;
use std::fmt::Write as _;

/// Appended in place of the frames that did not fit
pub const TRUNCATION_MARKER: &str = "***\n";

/// Upper bound on the memory reserved up front by [`ReportBuffer::with_capacity`]
const PREALLOCATE_LIMIT: usize = 4096;

/// Caller-supplied bounded text buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBuffer {
    text: String,
    capacity: usize,
    truncated: bool,
}

impl ReportBuffer {
    /// Buffer that will never hold more than `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the last write stopped early and appended the marker
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.truncated = false;
    }

    pub fn into_string(self) -> String {
        self.text
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.text.len())
    }

    fn push_marker(&mut self) {
        // The marker is ASCII, so any prefix is a valid str
        let fits = TRUNCATION_MARKER.len().min(self.remaining());
        self.text.push_str(&TRUNCATION_MARKER[..fits]);
        self.truncated = true;
    }
}

/// Remove a trailing ` [0x...]` load-address annotation and trailing whitespace
pub fn strip_annotation(frame: &str) -> &str {
    let trimmed = frame.trim_end();
    if !trimmed.ends_with(']') {
        return trimmed;
    }
    match trimmed.rfind(" [0x") {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    }
}

/// Append frames to `buffer`, one per line
///
/// Returns `false` if the frames did not all fit and the output was
/// truncated.
pub fn write_frames(frames: &[String], buffer: &mut ReportBuffer) -> bool {
    let stripped: Vec<&str> = frames.iter().map(|f| strip_annotation(f)).collect();
    let mut rest: usize = stripped.iter().map(|f| f.len() + 1).sum();

    for frame in stripped {
        let needed = frame.len() + 1;
        // While the remainder cannot fit, only accept frames that leave room for the marker
        if rest > buffer.remaining() && needed + TRUNCATION_MARKER.len() > buffer.remaining() {
            buffer.push_marker();
            return false;
        }

        buffer.text.push_str(frame);
        buffer.text.push('\n');
        rest -= needed;
    }
    true
}

/// Join frames into at most `max_bytes` of text
pub fn format_frames(frames: &[String], max_bytes: usize) -> String {
    let mut buffer = ReportBuffer::with_capacity(max_bytes);
    write_frames(frames, &mut buffer);
    buffer.into_string()
}

/// Emit the report for a newly seen call path to the log
pub fn log_first_seen(fingerprint: Fingerprint, frame_count: usize, text: &str) {
    tracing::info!(
        target: "callpath",
        fingerprint = %fingerprint,
        frames = frame_count,
        "first call path, {} frames:\n{}",
        frame_count,
        text
    );
}

/// Render the whole registry as a text table
///
/// One `<fingerprint> <visits>` line per record, sorted by fingerprint.
pub fn dump<R: Registry + ?Sized>(registry: &R) -> String {
    let records = registry.snapshot();
    let total: u64 = records.iter().map(|r| r.visits).sum();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "call paths: {} distinct, {} visits",
        records.len(),
        total
    );
    let _ = writeln!(out, "{:<16} {:>10}", "fingerprint", "visits");
    for record in &records {
        let _ = writeln!(out, "{} {:>10}", record.fingerprint, record.visits);
    }
    out
}

/// Registry dump in JSON form
#[derive(Debug, Clone, Serialize)]
pub struct JsonRegistryDump {
    pub stats: RegistryStats,
    pub records: Vec<VisitRecord>,
}

/// Render the whole registry as pretty-printed JSON
pub fn dump_json<R: Registry + ?Sized>(registry: &R) -> Result<String> {
    let dump = JsonRegistryDump {
        stats: registry.stats(),
        records: registry.snapshot(),
    };
    Ok(serde_json::to_string_pretty(&dump)?)
}
