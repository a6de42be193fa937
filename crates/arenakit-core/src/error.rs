//! Error taxonomy for arena allocators.
//!
//! Every operation either fully completes or fails with one of these
//! variants and the arena metadata unchanged. Nothing is retried
//! internally.

use thiserror::Error;

use crate::fit::FitMode;

/// Errors reported by allocator construction, allocation and deallocation.
#[derive(Debug, Error)]
pub enum AllocError {
    /// Requested arena size cannot hold the strategy's minimum header.
    #[error("arena of {requested} bytes is below the minimum of {minimum} bytes")]
    ArenaTooSmall { requested: usize, minimum: usize },

    /// The parent allocator could not supply the arena.
    #[error("parent allocator could not supply an arena of {requested} bytes")]
    ParentFailed {
        requested: usize,
        #[source]
        source: Box<AllocError>,
    },

    /// Buddy arena exponent beyond what an offset can address.
    #[error("arena exponent {power} exceeds the addressable maximum {max}")]
    ExponentTooLarge { power: u32, max: u32 },

    /// `value_size * values_count` overflowed.
    #[error("allocation size overflow: {value_size} * {values_count}")]
    SizeOverflow {
        value_size: usize,
        values_count: usize,
    },

    /// No free region satisfies the request under the active fit mode.
    #[error("no {mode} region satisfies {requested} bytes", mode = .mode.label())]
    OutOfMemory { requested: usize, mode: FitMode },

    /// The handle does not name a live block owned by this instance.
    ///
    /// Covers cross-allocator frees, double frees (owner words are
    /// scrubbed on release) and handles that never came from `allocate`.
    #[error("block at offset {offset} is not owned by this allocator")]
    ForeignBlock { offset: usize },

    /// A data access ran past the block's usable payload.
    #[error("access of {len} bytes at {at} exceeds block payload of {payload} bytes")]
    OutOfBounds { at: usize, len: usize, payload: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_fit_mode_label() {
        let err = AllocError::OutOfMemory {
            requested: 64,
            mode: FitMode::BestFit,
        };
        assert_eq!(err.to_string(), "no best-fit region satisfies 64 bytes");
    }

    #[test]
    fn test_parent_failure_carries_source() {
        let err = AllocError::ParentFailed {
            requested: 128,
            source: Box::new(AllocError::OutOfMemory {
                requested: 128,
                mode: FitMode::FirstFit,
            }),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
