/// Cumulative counters a caller can poll for observability.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamTelemetry {
    pub range_requests: u64,
    pub bytes_downloaded: u64,
    pub cache_hit_segments: u64,
    pub cache_miss_segments: u64,
    pub retries: u64,
}
