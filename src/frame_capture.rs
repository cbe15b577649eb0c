//! Stack capture and symbolization for the current thread
//!
//! The detector only needs two things from the platform: the ordered list
//! of return addresses leading to the current point of execution, and a
//! best-effort way to turn those addresses into readable text. Both are
//! expressed by the [`FrameCapture`] trait so tests can script call paths
//! without depending on the real unwinder.
//!
//! [`BacktraceCapture`] implements the trait with the `backtrace` crate.
//! Frames are reported innermost-first (immediate caller first) with the
//! capture machinery itself already removed.
//!
//! Frames are return addresses in the generated code. Two source-level
//! visits of the same call only produce the same frames if they execute
//! the same call instruction, which does not hold once the optimizer has
//! duplicated that call (unrolled loops, multiply inlined functions).

use std::ffi::c_void;
use std::fmt;

/// Frames walked past the requested depth while searching for the capture anchor
const ANCHOR_SLACK: usize = 16;

/// A single call frame, identified by its return address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallFrame {
    /// Instruction pointer (return address)
    pub ip: u64,
}

impl CallFrame {
    pub const fn new(ip: u64) -> Self {
        Self { ip }
    }
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.ip)
    }
}

/// Source of raw call frames and their symbolic descriptions
pub trait FrameCapture: Send + Sync {
    /// Capture up to `max_depth` frames of the calling thread's stack,
    /// innermost first, excluding the frames of `capture` itself and the
    /// next `skip` frames above it (wrappers of the caller that should not
    /// be part of the path). Captures that replay recorded paths may
    /// ignore `skip`.
    ///
    /// Identical call paths must produce identical frame sequences for the
    /// lifetime of the process.
    fn capture(&self, skip: usize, max_depth: usize) -> Vec<CallFrame>;

    /// Describe each frame as text, one entry per input frame.
    ///
    /// Frames that cannot be resolved fall back to the raw address
    /// rendered as `0x...`; this never fails.
    fn symbolize(&self, frames: &[CallFrame]) -> Vec<String>;
}

/// [`FrameCapture`] backed by the `backtrace` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceCapture;

impl BacktraceCapture {
    pub fn new() -> Self {
        Self
    }
}

impl FrameCapture for BacktraceCapture {
    #[inline(never)]
    fn capture(&self, skip: usize, max_depth: usize) -> Vec<CallFrame> {
        // First frame left by walk_stack is this method
        let own = skip.saturating_add(1);
        let frames = walk_stack(max_depth.saturating_add(own));
        let frames: Vec<CallFrame> = frames.into_iter().skip(own).take(max_depth).collect();
        std::hint::black_box(frames)
    }

    fn symbolize(&self, frames: &[CallFrame]) -> Vec<String> {
        frames.iter().map(|frame| describe_frame(*frame)).collect()
    }
}

/// Walk the current stack, dropping every frame up to and including this
/// function's own frame.
///
/// The frames above `walk_stack` belong to the unwinder and vary by
/// platform, so instead of skipping a fixed count we look for the frame
/// whose enclosing function is `walk_stack`. If the unwinder cannot report
/// enclosing function addresses the raw walk is returned; it is still
/// deterministic, it just carries a few extra leading frames.
#[inline(never)]
fn walk_stack(max_depth: usize) -> Vec<CallFrame> {
    let anchor = walk_stack as fn(usize) -> Vec<CallFrame> as usize;
    let limit = max_depth.saturating_add(ANCHOR_SLACK);

    let mut raw: Vec<CallFrame> = Vec::with_capacity(limit.min(64));
    let mut anchor_at: Option<usize> = None;

    backtrace::trace(|frame| {
        if anchor_at.is_none() && frame.symbol_address() as usize == anchor {
            anchor_at = Some(raw.len());
        }
        raw.push(CallFrame::new(frame.ip() as usize as u64));

        match anchor_at {
            Some(at) => raw.len() - at - 1 < max_depth,
            None => raw.len() < limit,
        }
    });

    let frames = match anchor_at {
        Some(at) => raw.split_off(at + 1),
        None => {
            tracing::trace!(
                walked = raw.len(),
                "capture anchor not found; returning unfiltered stack walk"
            );
            raw.truncate(max_depth);
            raw
        }
    };
    std::hint::black_box(frames)
}

/// Render one frame as `function+0xOFFSET (file:line) [0xADDRESS]`
///
/// The bracketed load address is the annotation the report formatter
/// strips. Unresolved frames render as the bare address.
fn describe_frame(frame: CallFrame) -> String {
    let mut description = None;

    backtrace::resolve(frame.ip as usize as *mut c_void, |symbol| {
        if description.is_some() {
            return;
        }
        let Some(name) = symbol.name() else {
            return;
        };

        let mut text = format!("{:#}", name);
        if let Some(start) = symbol.addr() {
            let offset = frame.ip.wrapping_sub(start as usize as u64);
            text.push_str(&format!("+0x{:x}", offset));
        }
        if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
            text.push_str(&format!(" ({}:{})", file.display(), line));
        }
        text.push_str(&format!(" [{}]", frame));
        description = Some(text);
    });

    description.unwrap_or_else(|| frame.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn capture_from_site_a(capture: &BacktraceCapture) -> Vec<CallFrame> {
        let frames = capture.capture(0, 8);
        std::hint::black_box(frames)
    }

    #[inline(never)]
    fn capture_from_site_b(capture: &BacktraceCapture) -> Vec<CallFrame> {
        let frames = capture.capture(0, 8);
        std::hint::black_box(frames)
    }

    #[test]
    fn test_call_frame_display() {
        let frame = CallFrame::new(0xDEADBEEF);
        assert_eq!(frame.to_string(), "0xdeadbeef");
    }

    #[test]
    fn test_call_frame_ordering() {
        let low = CallFrame::new(0x1000);
        let high = CallFrame::new(0x2000);
        assert!(low < high);
        assert_eq!(low, CallFrame { ip: 0x1000 });
    }

    #[test]
    fn test_capture_respects_max_depth() {
        let capture = BacktraceCapture::new();
        let frames = capture.capture(0, 3);
        assert!(!frames.is_empty());
        assert!(frames.len() <= 3);
    }

    #[test]
    fn test_capture_zero_depth_is_empty() {
        let capture = BacktraceCapture::new();
        assert!(capture.capture(0, 0).is_empty());
    }

    #[test]
    fn test_capture_is_deterministic_for_same_site() {
        let capture = BacktraceCapture::new();
        let mut walks = Vec::new();
        for _ in 0..std::hint::black_box(3) {
            walks.push(capture_from_site_a(&capture));
        }
        assert_eq!(walks[0], walks[1]);
        assert_eq!(walks[1], walks[2]);
    }

    #[test]
    fn test_capture_differs_between_sites() {
        let capture = BacktraceCapture::new();
        let a = capture_from_site_a(&capture);
        let b = capture_from_site_b(&capture);
        assert_ne!(a, b);
    }

    #[test]
    fn test_symbolize_one_entry_per_frame() {
        let capture = BacktraceCapture::new();
        let frames = capture_from_site_a(&capture);
        let symbols = capture.symbolize(&frames);
        assert_eq!(symbols.len(), frames.len());
        assert!(symbols.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_symbolize_unresolvable_falls_back_to_address() {
        let capture = BacktraceCapture::new();
        let symbols = capture.symbolize(&[CallFrame::new(0x8)]);
        assert_eq!(symbols, vec!["0x8".to_string()]);
    }
}
