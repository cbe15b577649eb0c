//! Call path detector
//!
//! [`CallPath`] ties the pieces together: capture the caller's stack,
//! derive the registry identity, observe it, and on demand render the
//! frames as text. Each detector owns its registry, so independent
//! detectors (one per test, one per fault-injection site, ...) never see
//! each other's paths. The crate-level functions [`crate::is_unique`] and
//! [`crate::is_unique_into`] use one process-wide detector.
//!
//! # Optimized builds
//!
//! A call path is the sequence of return addresses above the instrumented
//! function, so it follows the machine code rather than the source. When
//! the optimizer duplicates a call (full loop unrolling, a function
//! inlined into several callers), every copy has its own return address
//! and is reported as a distinct path. A loop with a constant trip count
//! around the instrumented call is the usual case. Lower
//! [`DetectorConfig::max_depth`] so the capture stops below such frames,
//! or keep the trip count opaque to the optimizer.
//!
//! # Example
//!
//! ```
//! use callpath::detector::CallPath;
//! use std::hint::black_box;
//!
//! let detector = CallPath::new();
//! let mut firsts = 0;
//! for _ in 0..black_box(10) {
//!     if detector.is_unique().unwrap() {
//!         firsts += 1;
//!     }
//! }
//! assert_eq!(firsts, 1);
//! ```

use crate::error::{CallPathError, Result};
use crate::frame_capture::{BacktraceCapture, FrameCapture};
use crate::registry::{CallerSlots, PathRegistry, Registry, RegistryStats};
use crate::report::{self, ReportBuffer};

/// Environment variable overriding [`DetectorConfig::max_depth`]
pub const MAX_DEPTH_ENV: &str = "CALLPATH_MAX_DEPTH";

/// Environment variable overriding [`DetectorConfig::report_capacity`]
pub const REPORT_BYTES_ENV: &str = "CALLPATH_REPORT_BYTES";

/// Configuration for a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Frames captured per call path, starting at the immediate caller
    pub max_depth: usize,
    /// Byte budget for reports written to the log
    pub report_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            max_depth: 8,
            report_capacity: 1024,
        }
    }
}

impl DetectorConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_report_capacity(mut self, report_capacity: usize) -> Self {
        self.report_capacity = report_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(CallPathError::InvalidConfig(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Defaults overridden by `CALLPATH_MAX_DEPTH` and `CALLPATH_REPORT_BYTES`
    pub fn from_env() -> Result<Self> {
        let mut config = DetectorConfig::default();
        if let Some(depth) = env_usize(MAX_DEPTH_ENV)? {
            config.max_depth = depth;
        }
        if let Some(bytes) = env_usize(REPORT_BYTES_ENV)? {
            config.report_capacity = bytes;
        }
        config.validate()?;
        Ok(config)
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            CallPathError::InvalidConfig(format!("{}={:?} is not a non-negative integer", name, value))
        }),
        Err(_) => Ok(None),
    }
}

/// Detects the first occurrence of each distinct call path
#[derive(Debug)]
pub struct CallPath<R = PathRegistry, C = BacktraceCapture> {
    registry: R,
    capture: C,
    config: DetectorConfig,
}

impl CallPath {
    /// Unbounded detector keyed by full-stack fingerprints
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        CallPath::with_parts(PathRegistry::new(), BacktraceCapture::new(), config)
    }
}

impl Default for CallPath {
    fn default() -> Self {
        Self::new()
    }
}

impl CallPath<CallerSlots> {
    /// Fixed-capacity detector keyed by the calling site only
    pub fn bounded() -> Self {
        CallPath::with_parts(
            CallerSlots::new(),
            BacktraceCapture::new(),
            DetectorConfig::default(),
        )
    }
}

impl<R: Registry, C: FrameCapture> CallPath<R, C> {
    pub fn with_parts(registry: R, capture: C, config: DetectorConfig) -> Self {
        Self {
            registry,
            capture,
            config,
        }
    }

    /// `true` the first time the calling path is seen
    ///
    /// On first occurrence the frames are written to the log (`info` level,
    /// target `callpath`).
    ///
    /// # Errors
    ///
    /// [`CallPathError::EmptyCapture`] if the stack could not be captured.
    #[inline(never)]
    pub fn is_unique(&self) -> Result<bool> {
        let first = self.detect(1, None);
        // Keeps this frame on the stack instead of a tail call
        std::hint::black_box(first)
    }

    /// `true` the first time the calling path is seen
    ///
    /// The frame text is always written to `report`, replacing its previous
    /// contents and truncated to its capacity. Nothing is logged.
    ///
    /// # Errors
    ///
    /// [`CallPathError::EmptyCapture`] if the stack could not be captured.
    #[inline(never)]
    pub fn is_unique_into(&self, report: &mut ReportBuffer) -> Result<bool> {
        let first = self.detect(1, Some(report));
        std::hint::black_box(first)
    }

    /// Capture, observe and report.
    ///
    /// `callers` is the number of frames between this function and the
    /// instrumented code (the public entry points); they are dropped along
    /// with this function's own frame.
    #[inline(never)]
    pub(crate) fn detect(&self, callers: usize, mut report: Option<&mut ReportBuffer>) -> Result<bool> {
        // A failed capture must not leave the previous report behind
        if let Some(buffer) = report.as_mut() {
            buffer.clear();
        }

        let frames = self.capture.capture(callers + 1, self.config.max_depth);
        if frames.is_empty() {
            tracing::error!("stack capture returned no frames");
            return Err(CallPathError::EmptyCapture);
        }

        let fingerprint = self.registry.identity(&frames)?;
        let first = self.registry.observe(fingerprint);

        // Symbolization is slow; it runs after the registry lock is released
        match report {
            Some(buffer) => {
                let symbols = self.capture.symbolize(&frames);
                report::write_frames(&symbols, buffer);
            }
            None if first => {
                let symbols = self.capture.symbolize(&frames);
                let text = report::format_frames(&symbols, self.config.report_capacity);
                report::log_first_seen(fingerprint, frames.len(), &text);
            }
            None => {}
        }

        std::hint::black_box(Ok(first))
    }

    /// Fingerprint and visit count table as text
    pub fn dump(&self) -> String {
        report::dump(&self.registry)
    }

    pub fn dump_json(&self) -> Result<String> {
        report::dump_json(&self.registry)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
