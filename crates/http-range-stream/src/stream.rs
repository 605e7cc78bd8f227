use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use url::Url;

use segment_cache::Cache;

use crate::backend::{BackendRequest, RangeBackend, RangeBackendFactory};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::telemetry::StreamTelemetry;

#[cfg(not(target_arch = "wasm32"))]
use crate::hyper_backend::HyperRangeBackend;

/// Mutually exclusive operation in progress, mirrored onto the public API as
/// derived booleans (`loading()`, `seeking()`, `buffering()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Seeking,
    Buffering,
}

struct Shared {
    phase: Phase,
    loaded: bool,
    closed: bool,
    seekable: bool,
    /// `-1` means unknown, matching the wire contract's sentinel.
    length: i64,
    headers: Vec<(String, String)>,
    cachever: u64,
    backend: Option<Box<dyn RangeBackend + Send>>,
    validator: Option<String>,
    cache: Cache,
    telemetry: StreamTelemetry,
    /// Bumped by every `abort()` call. `buffer()`/`read_sync()` capture this
    /// at the start of their work and bail with `Aborted` if it has moved by
    /// the time they're about to report success — otherwise a concurrent
    /// `abort()` that raced between `drain_backend_to` iterations would go
    /// unnoticed (the backend is simply gone, which looks identical to
    /// "nothing left to fetch") and the operation would quietly reopen a new
    /// backend and carry on as if nothing happened.
    abort_epoch: u64,
}

struct Inner {
    url: Url,
    factory: Arc<dyn RangeBackendFactory>,
    config: StreamConfig,
    state: Mutex<Shared>,
}

/// Public facade coordinating a single in-flight HTTP range download with an
/// in-memory [`Cache`]. Cheaply cloneable (an `Arc` around shared state), so
/// multiple callers may hold a handle to the same underlying stream —
/// concurrent reads into the same byte range are naturally deduplicated
/// because at most one backend is ever in flight.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

/// A point-in-time read of the fields the specification this crate
/// implements calls "observable fields".
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub length: i64,
    pub offset: u64,
    pub eof: bool,
    pub loaded: bool,
    pub loading: bool,
    pub seeking: bool,
    pub buffering: bool,
    pub seekable: bool,
    pub headers: Vec<(String, String)>,
}

impl Stream {
    /// Builds a `Stream` against an arbitrary [`RangeBackendFactory`] —
    /// the seam alternate transports (WASM `fetch`, a byte-stream reader)
    /// plug into.
    pub fn with_factory(config: StreamConfig, factory: Arc<dyn RangeBackendFactory>) -> Self {
        let cache = Cache::new(config.options.cache_size, config.options.chunk_size);
        let url = config.url.clone();
        let validator = config.validator.clone();
        let inner = Inner {
            url,
            factory,
            config,
            state: Mutex::new(Shared {
                phase: Phase::Idle,
                loaded: false,
                closed: false,
                seekable: false,
                length: -1,
                headers: Vec::new(),
                cachever: 0,
                backend: None,
                validator,
                cache,
                telemetry: StreamTelemetry::default(),
                abort_epoch: 0,
            }),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Builds a `Stream` backed by the real `hyper`-based HTTP client.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn open(config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        let factory = Arc::new(HyperRangeBackend::new(config.options.max_retries));
        Ok(Self::with_factory(config, factory))
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub async fn length(&self) -> i64 {
        self.inner.state.lock().await.length
    }

    pub async fn offset(&self) -> u64 {
        self.inner.state.lock().await.cache.read_offset()
    }

    pub async fn eof(&self) -> bool {
        let s = self.inner.state.lock().await;
        s.length >= 0 && s.cache.read_offset() as i64 == s.length
    }

    pub async fn loaded(&self) -> bool {
        self.inner.state.lock().await.loaded
    }

    pub async fn loading(&self) -> bool {
        self.inner.state.lock().await.phase == Phase::Loading
    }

    pub async fn seeking(&self) -> bool {
        self.inner.state.lock().await.phase == Phase::Seeking
    }

    pub async fn buffering(&self) -> bool {
        self.inner.state.lock().await.phase == Phase::Buffering
    }

    pub async fn seekable(&self) -> bool {
        self.inner.state.lock().await.seekable
    }

    pub async fn validator(&self) -> Option<String> {
        self.inner.state.lock().await.validator.clone()
    }

    pub async fn telemetry_snapshot(&self) -> StreamTelemetry {
        self.inner.state.lock().await.telemetry
    }

    pub async fn get_buffered_ranges(&self) -> Vec<(u64, u64)> {
        self.inner
            .state
            .lock()
            .await
            .cache
            .ranges()
            .into_iter()
            .map(|r| (r.start, r.end))
            .collect()
    }

    pub async fn bytes_available(&self, max: Option<u64>) -> u64 {
        self.inner.state.lock().await.cache.bytes_readable(max)
    }

    pub async fn snapshot(&self) -> StreamSnapshot {
        let s = self.inner.state.lock().await;
        StreamSnapshot {
            length: s.length,
            offset: s.cache.read_offset(),
            eof: s.length >= 0 && s.cache.read_offset() as i64 == s.length,
            loaded: s.loaded,
            loading: s.phase == Phase::Loading,
            seeking: s.phase == Phase::Seeking,
            buffering: s.phase == Phase::Buffering,
            seekable: s.seekable,
            headers: s.headers.clone(),
        }
    }

    /// Opens the first backend and captures `seekable`/`length`/`headers`.
    pub async fn load(&self) -> Result<(), StreamError> {
        {
            let mut s = self.inner.state.lock().await;
            if s.closed {
                return Err(StreamError::InvalidState("stream is closed"));
            }
            if s.phase != Phase::Idle || s.loaded {
                return Err(StreamError::InvalidState(
                    "load() called while loading or already loaded",
                ));
            }
            s.phase = Phase::Loading;
        }

        let result = self.open_backend(true).await;

        let mut s = self.inner.state.lock().await;
        s.phase = Phase::Idle;
        match result {
            Ok(_) => {
                s.loaded = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Internal: implements §4.5.3's `open_backend`. `is_load` additionally
    /// copies `seekable`/`length`/`headers` onto the coordinator and sets the
    /// validator if this is the very first backend. Returns `true` if a
    /// backend was opened, `false` if there is nothing left to fetch.
    async fn open_backend(&self, is_load: bool) -> Result<bool, StreamError> {
        const MAX_ANOMALY_RETRIES: u32 = 8;

        for _ in 0..MAX_ANOMALY_RETRIES {
            let (offset, length, cachever, if_range, headers);
            {
                let mut s = self.inner.state.lock().await;
                if s.backend.is_some() {
                    return Err(StreamError::CacheInvariant(
                        "open_backend called while a backend is already in flight".to_string(),
                    ));
                }
                let readable = s.cache.bytes_readable(Some(self.inner.config.options.chunk_size));
                let read_tail = s.cache.read_offset() + readable;

                if s.length >= 0 && read_tail as i64 >= s.length {
                    return Ok(false);
                }

                s.cache.seek_write(read_tail)?;

                let mut writable = s
                    .cache
                    .bytes_writable(Some(self.inner.config.options.chunk_size));
                if s.length >= 0 {
                    let remaining = (s.length as u64).saturating_sub(s.cache.write_offset());
                    writable = writable.min(remaining);
                }
                if writable == 0 {
                    return Ok(false);
                }

                offset = s.cache.write_offset();
                length = writable;
                cachever = s.cachever;
                if_range = s.validator.clone();
                headers = self.inner.config.request_headers.clone();
            }

            let req = BackendRequest {
                url: self.inner.url.clone(),
                offset,
                length,
                cachever,
                progressive: self.inner.config.options.progressive,
                headers,
                if_range,
            };

            let backend = match self.inner.factory.open(req).await {
                Ok(b) => b,
                Err(e) => return Err(e),
            };

            let meta = backend.meta().clone();

            let mut s = self.inner.state.lock().await;

            if meta.seekable && meta.actual_offset != meta.requested_offset {
                tracing::warn!(
                    requested = meta.requested_offset,
                    actual = meta.actual_offset,
                    "range-cache anomaly detected, retrying with a cache-busting query parameter"
                );
                s.cachever += 1;
                drop(s);
                let mut backend = backend;
                backend.abort().await;
                continue;
            }

            if let Some(validator) = &meta.validator {
                match &s.validator {
                    Some(expected) if expected != validator => {
                        return Err(StreamError::ValidatorMismatch {
                            expected: expected.clone(),
                            actual: validator.clone(),
                        });
                    }
                    None => {
                        s.validator = Some(validator.clone());
                    }
                    _ => {}
                }
            }

            if is_load {
                s.seekable = meta.seekable;
                s.length = meta.length;
                s.headers = meta.headers.clone();
                if meta.length >= 0 {
                    if let Err(e) = s.cache.write_eof(meta.length as u64) {
                        tracing::warn!(error = %e, "failed to pin cache length at load");
                    }
                }
            }

            s.telemetry.range_requests += 1;
            s.telemetry.cache_miss_segments += 1;
            s.backend = Some(backend);
            return Ok(true);
        }

        Err(StreamError::Network(
            "range-cache anomaly persisted after repeated cache-busting retries".to_string(),
        ))
    }

    /// Pulls chunks from the current backend, writing them into the cache,
    /// until the backend's offset reaches `end` or the backend is exhausted.
    async fn drain_backend_to(&self, end: u64) -> Result<(), StreamError> {
        loop {
            let backend_offset = {
                let s = self.inner.state.lock().await;
                match &s.backend {
                    Some(b) => b.offset(),
                    None => return Ok(()),
                }
            };
            if backend_offset >= end {
                return Ok(());
            }

            let chunk = {
                let mut s = self.inner.state.lock().await;
                let backend = match s.backend.as_mut() {
                    Some(b) => b,
                    None => return Ok(()),
                };
                backend.next_chunk().await
            };

            match chunk {
                Ok(Some(bytes)) => {
                    self.write_chunk(bytes).await?;
                }
                Ok(None) => {
                    self.finish_backend().await;
                    return Ok(());
                }
                Err(e) => {
                    self.clear_backend().await;
                    return Err(e);
                }
            }
        }
    }

    async fn write_chunk(&self, bytes: Bytes) -> Result<(), StreamError> {
        let mut s = self.inner.state.lock().await;
        let n = bytes.len() as u64;
        s.cache.write(&bytes)?;
        s.telemetry.bytes_downloaded += n;
        Ok(())
    }

    /// Handles a backend's `done`: an origin with unknown length is now
    /// known to end at this backend's final offset.
    async fn finish_backend(&self) {
        let mut s = self.inner.state.lock().await;
        if let Some(backend) = &s.backend {
            if s.length < 0 {
                let end = backend.offset();
                s.length = end as i64;
                if let Err(e) = s.cache.write_eof(end) {
                    tracing::warn!(error = %e, "failed to pin cache length on backend exhaustion");
                }
            }
        }
        s.backend = None;
    }

    async fn clear_backend(&self) {
        let mut s = self.inner.state.lock().await;
        s.backend = None;
    }

    /// Aborts the current backend (if any) and clears all in-progress phase
    /// flags. Idempotent.
    pub async fn abort(&self) {
        let mut backend = {
            let mut s = self.inner.state.lock().await;
            s.phase = Phase::Idle;
            s.abort_epoch += 1;
            s.backend.take()
        };
        if let Some(backend) = backend.as_mut() {
            backend.abort().await;
        }
    }

    /// Aborts and permanently closes the stream; subsequent operations fail
    /// with `InvalidState`.
    pub async fn close(&self) {
        self.abort().await;
        self.inner.state.lock().await.closed = true;
    }

    pub async fn seek(&self, offset: u64) -> Result<(), StreamError> {
        {
            let s = self.inner.state.lock().await;
            if s.closed {
                return Err(StreamError::InvalidState("stream is closed"));
            }
            if !s.loaded {
                return Err(StreamError::InvalidState("seek() called before load()"));
            }
            if s.phase == Phase::Seeking || s.phase == Phase::Buffering {
                return Err(StreamError::InvalidState(
                    "seek() called while seeking or buffering",
                ));
            }
            if !s.seekable {
                return Err(StreamError::NotSeekable);
            }
            if s.length >= 0 && offset > s.length as u64 {
                return Err(StreamError::InvalidInput(
                    "seek offset past the known length",
                ));
            }
        }

        self.abort().await;

        {
            let mut s = self.inner.state.lock().await;
            s.phase = Phase::Seeking;
            // The write cursor isn't relocated here: `open_backend` always
            // repositions it from scratch before the next fetch, and doing
            // it eagerly would reject seeking exactly to a known EOF (a
            // valid read position, but never a valid write position).
            s.cache.seek_read(offset)?;
            s.phase = Phase::Idle;
        }

        if self.inner.config.options.read_ahead {
            self.spawn_readahead();
        }
        Ok(())
    }

    /// Ensures `[offset, offset+n)` (capped by EOF) is resident in the
    /// cache, fetching as needed. Returns the number of bytes made
    /// available.
    pub async fn buffer(&self, n: u64) -> Result<u64, StreamError> {
        let epoch = {
            let s = self.inner.state.lock().await;
            if s.closed {
                return Err(StreamError::InvalidState("stream is closed"));
            }
            if !s.loaded {
                return Err(StreamError::InvalidState("buffer() called before load()"));
            }
            s.abort_epoch
        };

        let start = self.offset().await;
        let want = {
            let s = self.inner.state.lock().await;
            match s.length {
                l if l >= 0 => (l as u64).saturating_sub(start).min(n),
                _ => n,
            }
        };
        let end = start + want;

        loop {
            let readable = self.bytes_available(Some(want)).await;
            if readable >= want {
                return Ok(readable);
            }

            let has_backend = {
                let mut s = self.inner.state.lock().await;
                if s.abort_epoch != epoch {
                    return Err(StreamError::Aborted);
                }
                if s.phase == Phase::Idle {
                    s.phase = Phase::Buffering;
                }
                s.backend.is_some()
            };

            let opened = if has_backend {
                true
            } else {
                match self.open_backend(false).await {
                    Ok(v) => v,
                    Err(e) => {
                        self.clear_phase_after_error().await;
                        return Err(e);
                    }
                }
            };

            if !opened {
                let mut s = self.inner.state.lock().await;
                if s.phase == Phase::Buffering {
                    s.phase = Phase::Idle;
                }
                if s.abort_epoch != epoch {
                    return Err(StreamError::Aborted);
                }
                return Ok(self.bytes_available(Some(want)).await.min(want));
            }

            if let Err(e) = self.drain_backend_to(end).await {
                self.clear_phase_after_error().await;
                return Err(e);
            }

            if self.inner.state.lock().await.abort_epoch != epoch {
                return Err(StreamError::Aborted);
            }
        }
    }

    async fn clear_phase_after_error(&self) {
        let mut s = self.inner.state.lock().await;
        if s.phase == Phase::Buffering {
            s.phase = Phase::Idle;
        }
    }

    pub async fn read(&self, n: u64) -> Result<Vec<u8>, StreamError> {
        self.buffer(n).await?;
        self.read_sync(n).await
    }

    pub async fn read_sync(&self, n: u64) -> Result<Vec<u8>, StreamError> {
        let (available, epoch) = {
            let s = self.inner.state.lock().await;
            if s.closed {
                return Err(StreamError::InvalidState("stream is closed"));
            }
            if !s.loaded {
                return Err(StreamError::InvalidState("read_sync() called before load()"));
            }
            if s.phase == Phase::Buffering || s.phase == Phase::Seeking {
                return Err(StreamError::InvalidState(
                    "read_sync() called while buffering or seeking",
                ));
            }
            (s.cache.bytes_readable(Some(n)), s.abort_epoch)
        };
        let take = available.min(n);
        let mut buf = vec![0u8; take as usize];

        // Re-check the epoch in the same lock acquisition that performs the
        // actual read: an `abort()` landing in the gap between the snapshot
        // above and this read must not let a reader walk away believing it
        // observed a post-abort success.
        {
            let mut s = self.inner.state.lock().await;
            if s.abort_epoch != epoch {
                return Err(StreamError::Aborted);
            }
            let n = s.cache.read_bytes(&mut buf);
            s.telemetry.cache_hit_segments += if n > 0 { 1 } else { 0 };
        }

        if self.inner.config.options.read_ahead {
            self.spawn_readahead();
        }
        Ok(buf)
    }

    pub async fn read_bytes(&self, dest: &mut [u8]) -> Result<u64, StreamError> {
        let mut s = self.inner.state.lock().await;
        let n = s.cache.read_bytes(dest);
        s.telemetry.cache_hit_segments += if n > 0 { 1 } else { 0 };
        Ok(n)
    }

    /// Best-effort: starts a backend if none exists and we're not at EOF.
    /// Errors are logged, never surfaced, matching the specification's
    /// "ignore the resulting promise" readahead policy.
    fn spawn_readahead(&self) {
        let stream = self.clone();
        tokio::spawn(async move {
            let has_backend = stream.inner.state.lock().await.backend.is_some();
            if has_backend {
                return;
            }
            if stream.eof().await {
                return;
            }
            if let Err(e) = stream.open_backend(false).await {
                tracing::debug!(error = %e, "readahead failed, ignoring");
            }
        });
    }
}
