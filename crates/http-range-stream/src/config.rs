use url::Url;

const MIB: u64 = 1024 * 1024;

/// Tunables that shape how aggressively a [`crate::Stream`] fetches and
/// retains data. Mutated in place by the caller after construction, mirroring
/// the teacher's config-struct convention rather than a builder chain.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk_size: u64,
    pub cache_size: u64,
    pub progressive: bool,
    pub read_ahead: bool,
    pub max_retries: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: MIB,
            cache_size: 32 * MIB,
            progressive: true,
            read_ahead: true,
            max_retries: 3,
        }
    }
}

/// Construction options for a [`crate::Stream`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    pub options: StreamOptions,
    /// Extra headers sent on every request (auth tokens, etc).
    pub request_headers: Vec<(String, String)>,
    /// If set, `load()` fails with `ValidatorMismatch` unless the origin's
    /// `ETag`/`Last-Modified` matches exactly.
    pub validator: Option<String>,
}

impl StreamConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            options: StreamOptions::default(),
            request_headers: Vec::new(),
            validator: None,
        }
    }

    /// Rejects configurations that would cause pathological behavior
    /// (absurd chunk sizes, zero/excessive retry counts) before any network
    /// I/O is attempted.
    pub(crate) fn validate(&self) -> Result<(), crate::StreamError> {
        const MAX_CHUNK_SIZE: u64 = 64 * MIB;
        if self.options.chunk_size == 0 || self.options.chunk_size > MAX_CHUNK_SIZE {
            return Err(crate::StreamError::InvalidInput(
                "chunk_size must be nonzero and at most 64 MiB",
            ));
        }
        if self.options.max_retries == 0 || self.options.max_retries > 32 {
            return Err(crate::StreamError::InvalidInput(
                "max_retries must be between 1 and 32",
            ));
        }
        Ok(())
    }
}
