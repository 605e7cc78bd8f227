use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::StreamError;

/// Metadata captured once a [`RangeBackend`]'s response headers are parsed,
/// corresponding to the `open` event in the specification this crate
/// implements: it tells the coordinator whether the origin honored the
/// `Range` request, what the resource's total length is (if known), and
/// which validator (if any) it returned.
#[derive(Debug, Clone)]
pub struct BackendMeta {
    pub seekable: bool,
    /// Total resource length, or `-1` if unknown (no `Content-Length` and
    /// not a `206` response).
    pub length: i64,
    pub headers: Vec<(String, String)>,
    pub validator: Option<String>,
    /// The offset this backend was asked to start at.
    pub requested_offset: u64,
    /// The offset a `206` response's `Content-Range` actually started at.
    /// Differs from `requested_offset` only under the range-cache anomaly
    /// (§4.4.1 of the specification this crate implements).
    pub actual_offset: u64,
}

/// One in-flight range request, already past the `open` stage. Bytes are
/// pulled rather than pushed: the coordinator calls [`next_chunk`] in a loop
/// until it has enough data or the backend is exhausted, which plays the
/// role of the specification's `buffer_to_offset` wait.
///
/// [`next_chunk`]: RangeBackend::next_chunk
#[async_trait]
pub trait RangeBackend: Send {
    fn meta(&self) -> &BackendMeta;

    /// Absolute offset of the next byte this backend will yield.
    fn offset(&self) -> u64;

    fn bytes_read(&self) -> u64;

    /// Returns the next chunk of body bytes, or `None` once this response
    /// is exhausted (its `done` event).
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError>;

    /// Cancels in-flight I/O. Idempotent.
    async fn abort(&mut self);
}

/// Parameters for opening one [`RangeBackend`], corresponding to the
/// `{url, offset, length, cachever, progressive}` tuple in §6.3 of the
/// specification this crate implements.
pub struct BackendRequest {
    pub url: Url,
    pub offset: u64,
    pub length: u64,
    pub cachever: u64,
    pub progressive: bool,
    pub headers: Vec<(String, String)>,
    /// A strong validator to send as `If-Range`. Weak validators (`W/"..."`)
    /// are never sent here (RFC 9110 forbids it) — the caller is
    /// responsible for that filtering.
    pub if_range: Option<String>,
}

/// Opens [`RangeBackend`]s for a `Stream`. Exists as a separate trait from
/// `RangeBackend` itself so that alternate transports (WASM `fetch`, a
/// byte-stream reader, …) can be swapped in without touching the
/// coordinator, per the "backend as trait" design note this crate follows.
#[async_trait]
pub trait RangeBackendFactory: Send + Sync {
    async fn open(&self, req: BackendRequest) -> Result<Box<dyn RangeBackend + Send>, StreamError>;
}
