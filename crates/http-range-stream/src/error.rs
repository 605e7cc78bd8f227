/// Errors surfaced by [`crate::Stream`].
///
/// `CacheInvariant` is defensive, like its counterpart in `segment-cache`:
/// seeing one means this crate's bookkeeping is wrong, not that the origin
/// misbehaved.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("operation not valid in the current state: {0}")]
    InvalidState(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("stream is not seekable")]
    NotSeekable,

    #[error("network error: {0}")]
    Network(String),

    #[error("operation aborted")]
    Aborted,

    #[error("cache invariant violated: {0}")]
    CacheInvariant(String),

    #[error("remote resource changed: expected validator {expected:?}, got {actual:?}")]
    ValidatorMismatch {
        expected: String,
        actual: String,
    },
}

impl From<segment_cache::SegmentCacheError> for StreamError {
    fn from(e: segment_cache::SegmentCacheError) -> Self {
        StreamError::CacheInvariant(e.to_string())
    }
}
