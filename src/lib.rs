//! Callpath - detect the first occurrence of every distinct call path
//!
//! This library answers one question at runtime: has the current call
//! stack been seen before in this process? It is meant for auditing which
//! distinct callers reach a function during testing, and for
//! fault-injection harnesses that should act once per call site.
//!
//! ```
//! fn instrumented() {
//!     if callpath::is_unique().unwrap() {
//!         // first visit from this call path
//!     }
//! }
//!
//! for _ in 0..3 {
//!     instrumented();
//! }
//! ```
//!
//! The crate-level functions share one lazily constructed detector. Code
//! that needs isolation (tests in particular) should own a
//! [`detector::CallPath`] instead.

pub mod cli;
pub mod detector;
pub mod error;
pub mod frame_capture;
pub mod lifecycle;
pub mod path_hash;
pub mod registry;
pub mod report;

use detector::{CallPath, DetectorConfig};
use lifecycle::LazyInstance;
use report::ReportBuffer;

pub use error::{CallPathError, Result};

static GLOBAL: LazyInstance<CallPath> = LazyInstance::new(build_global);

fn build_global() -> CallPath {
    CallPath::with_config(DetectorConfig::default())
}

/// The process-wide detector, constructed on first use with
/// [`DetectorConfig::default`]
pub fn global() -> &'static CallPath {
    GLOBAL.get()
}

/// `true` the first time the calling path is seen by the process-wide detector
///
/// First occurrences are written to the log. See [`CallPath::is_unique`].
#[inline(never)]
pub fn is_unique() -> Result<bool> {
    let first = global().detect(1, None);
    std::hint::black_box(first)
}

/// `true` the first time the calling path is seen by the process-wide detector
///
/// The frame text is always written to `report`. See [`CallPath::is_unique_into`].
#[inline(never)]
pub fn is_unique_into(report: &mut ReportBuffer) -> Result<bool> {
    let first = global().detect(1, Some(report));
    std::hint::black_box(first)
}

/// Fingerprint and visit count table of the process-wide detector
pub fn dump_registry() -> String {
    global().dump()
}
