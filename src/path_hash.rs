//! Call path fingerprinting
//!
//! Folds an ordered sequence of return addresses into a single 64-bit
//! [`Fingerprint`]. Each address is scrambled with the MurmurHash3 64-bit
//! finalizer and mixed into a running accumulator:
//!
//! ```text
//! acc ^= fmix64(ip) + K + (acc << 6) + (acc >> 2)
//! ```
//!
//! where `K` is the 64-bit golden-ratio constant. The fold is order
//! sensitive, so `A -> B` and `B -> A` produce different fingerprints.
//!
//! Fingerprints are probabilistic identities: two distinct paths may
//! collide, in which case they are treated as one path. There is no
//! cross-process compatibility requirement, so the constants may change
//! between versions.
//!
//! # Example
//! ```
//! use callpath::frame_capture::CallFrame;
//! use callpath::path_hash::hash_path;
//!
//! let path = [CallFrame::new(0x1000), CallFrame::new(0x2000)];
//! let fp = hash_path(&path).unwrap();
//!
//! // Deterministic - same frames produce same fingerprint
//! assert_eq!(fp, hash_path(&path).unwrap());
//! ```

use crate::error::{CallPathError, Result};
use crate::frame_capture::CallFrame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Odd mixing constant (2^64 / golden ratio)
pub const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// 64-bit digest of a call path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Fingerprint(value)
    }
}

/// MurmurHash3 64-bit finalizer
///
/// Every input bit affects every output bit with probability close to 1/2.
#[inline]
pub const fn scramble(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// Fingerprint a call path, innermost frame first
///
/// # Errors
///
/// Returns [`CallPathError::EmptyCapture`] for an empty path: a zero-length
/// path has no meaningful identity and would collapse every failed capture
/// into the same fingerprint.
pub fn hash_path(frames: &[CallFrame]) -> Result<Fingerprint> {
    if frames.is_empty() {
        return Err(CallPathError::EmptyCapture);
    }

    let acc = frames.iter().fold(0u64, |acc, frame| {
        acc ^ scramble(frame.ip)
            .wrapping_add(GOLDEN_GAMMA)
            .wrapping_add(acc << 6)
            .wrapping_add(acc >> 2)
    });

    Ok(Fingerprint(acc))
}
