/// Errors surfaced by [`crate::SegmentList`] and [`crate::Cache`].
///
/// `Invariant` is defensive: a well-behaved caller should never trigger it.
/// Seeing one means a precondition documented on the offending method was
/// violated, not that the remote resource misbehaved.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SegmentCacheError {
    #[error("offset {offset} is not covered by the segment list")]
    OutOfRange { offset: u64 },

    #[error("no contiguous space available for a write of this size")]
    NoSpace,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("cache invariant violated: {0}")]
    Invariant(&'static str),
}
