//! Byte-range wire helpers: building `Range` request headers and parsing
//! `Content-Range` / `Content-Length` response headers.
//!
//! Deliberately dependency-free — this crate only ever sees `&str`s that a
//! transport layer already pulled out of request/response headers, and never
//! performs I/O itself.

use std::fmt;

/// An absolute, inclusive byte range as it appears on the wire (`Range:
/// bytes=START-END`, `Content-Range: bytes START-END/TOTAL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedByteRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedByteRange {
    /// Number of bytes covered, inclusive of both ends. Saturates rather than
    /// panics on overflow; `0` when `end < start`.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end.saturating_sub(self.start).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// A parsed `Content-Range: bytes START-END/TOTAL` header. `total` is `None`
/// when the origin sent `*` for the instance length (RFC 9110 §14.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub range: ResolvedByteRange,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeParseError {
    MissingUnit,
    Malformed,
    InvalidNumber,
    EndBeforeStart,
}

impl fmt::Display for RangeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeParseError::MissingUnit => write!(f, "missing 'bytes' range unit"),
            RangeParseError::Malformed => write!(f, "malformed Content-Range header"),
            RangeParseError::InvalidNumber => write!(f, "non-numeric byte offset"),
            RangeParseError::EndBeforeStart => write!(f, "range end precedes range start"),
        }
    }
}

impl std::error::Error for RangeParseError {}

/// Builds the value of a `Range` request header for `[offset, offset +
/// length)`. Returns `None` when both `offset` and `length` are zero, per
/// the wire contract: an empty range at the start of the resource is
/// equivalent to not sending `Range` at all.
pub fn format_range_header(offset: u64, length: u64) -> Option<String> {
    if offset == 0 && length == 0 {
        return None;
    }
    let last = offset.saturating_add(length).saturating_sub(1);
    Some(format!("bytes={offset}-{last}"))
}

/// Parses a `Content-Range: bytes START-END/TOTAL` header value. `START` and
/// `END` are inclusive; `TOTAL` may be `*`.
pub fn parse_content_range(header: &str) -> Result<ContentRange, RangeParseError> {
    let header = header.trim();
    let rest = header
        .strip_prefix("bytes ")
        .ok_or(RangeParseError::MissingUnit)?;
    let (range_part, total_part) = rest.split_once('/').ok_or(RangeParseError::Malformed)?;
    let (start_str, end_str) = range_part
        .split_once('-')
        .ok_or(RangeParseError::Malformed)?;
    let start: u64 = start_str
        .trim()
        .parse()
        .map_err(|_| RangeParseError::InvalidNumber)?;
    let end: u64 = end_str
        .trim()
        .parse()
        .map_err(|_| RangeParseError::InvalidNumber)?;
    if end < start {
        return Err(RangeParseError::EndBeforeStart);
    }
    let total_part = total_part.trim();
    let total = if total_part == "*" {
        None
    } else {
        Some(
            total_part
                .parse()
                .map_err(|_| RangeParseError::InvalidNumber)?,
        )
    };
    Ok(ContentRange {
        range: ResolvedByteRange { start, end },
        total,
    })
}

/// Parses a `Content-Length` header value. Returns `None` for an absent or
/// empty header, matching spec §4.4's "`length = -1` if absent/empty" rule
/// (callers map `None` to `-1` at the coordinator boundary).
pub fn parse_content_length(header: Option<&str>) -> Option<u64> {
    let header = header?.trim();
    if header.is_empty() {
        return None;
    }
    header.parse().ok()
}

/// `true` if `etag` is a weak validator (`W/"..."`), which RFC 9110 forbids
/// using in `If-Range`.
pub fn is_weak_etag(etag: &str) -> bool {
    etag.trim_start().starts_with("W/")
}
