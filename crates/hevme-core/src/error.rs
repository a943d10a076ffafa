//! Motion estimation error types.

use thiserror::Error;

/// Result type for motion estimation operations.
pub type Result<T> = std::result::Result<T, HmeError>;

/// Errors surfaced at the engine API boundaries.
///
/// Internal recoverable conditions (candidate dedup hits, candidates out of
/// MV range, references not yet ready) are zero-cost skips and never become
/// errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HmeError {
    /// Pyramid geometry constraints not met at init.
    #[error("Invalid pyramid: {0}")]
    InvalidPyramid(String),

    /// A POC was not found in any descriptor, or a claimed reference is
    /// still marked in-use.
    #[error("Invalid reference map: {0}")]
    InvalidReferenceMap(String),

    /// Arena or descriptor pool empty.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Picture cancelled during processing.
    #[error("Picture cancelled (poc {poc})")]
    Cancelled { poc: i32 },
}
