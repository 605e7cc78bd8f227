use async_trait::async_trait;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, Client, Request, StatusCode};
use hyper_rustls::HttpsConnectorBuilder;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::{BackendMeta, BackendRequest, RangeBackend, RangeBackendFactory};
use crate::error::StreamError;
use range_http::{format_range_header, is_weak_etag, parse_content_length, parse_content_range};

type HyperClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// The non-WASM [`RangeBackendFactory`], built on `hyper` + `hyper-rustls`.
/// Retries transient failures (connection errors, 5xx) up to
/// [`crate::StreamOptions::max_retries`] times with a capped exponential
/// backoff, following the retry shape already present in the teacher's
/// streaming-disk HTTP client.
pub struct HyperRangeBackend {
    client: HyperClient,
    max_retries: u32,
}

impl HyperRangeBackend {
    pub fn new(max_retries: u32) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Self {
            client: Client::builder().build(https),
            max_retries,
        }
    }
}

impl Default for HyperRangeBackend {
    fn default() -> Self {
        Self::new(3)
    }
}

fn redact_query(url: &url::Url) -> String {
    let mut redacted = url.clone();
    if redacted.query().is_some() {
        redacted.set_query(Some("<redacted>"));
    }
    redacted.to_string()
}

fn build_request(req: &BackendRequest) -> Result<Request<Body>, StreamError> {
    let mut url = req.url.clone();
    if req.cachever > 0 {
        let extra = format!("buggy_cachever={}", req.cachever);
        let query = match url.query() {
            Some(q) => format!("{q}&{extra}"),
            None => extra,
        };
        url.set_query(Some(&query));
    }

    let mut builder = Request::get(url.as_str());
    if let Some(range) = format_range_header(req.offset, req.length) {
        builder = builder.header(hyper::header::RANGE, range);
    }
    for (name, value) in &req.headers {
        let name = HeaderName::from_str(name)
            .map_err(|_| StreamError::InvalidInput("invalid request header name"))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| StreamError::InvalidInput("invalid request header value"))?;
        builder = builder.header(name, value);
    }
    if let Some(validator) = &req.if_range {
        if !is_weak_etag(validator) {
            builder = builder.header(hyper::header::IF_RANGE, validator.as_str());
        }
    }

    builder
        .body(Body::empty())
        .map_err(|e| StreamError::Network(e.to_string()))
}

fn header_str<'a>(resp: &'a hyper::Response<Body>, name: hyper::header::HeaderName) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl RangeBackendFactory for HyperRangeBackend {
    async fn open(&self, req: BackendRequest) -> Result<Box<dyn RangeBackend + Send>, StreamError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = build_request(&req)?;
            let result = self.client.request(request).await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
                        let headers: Vec<(String, String)> = resp
                            .headers()
                            .iter()
                            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                            .collect();

                        if resp
                            .headers()
                            .get(hyper::header::CONTENT_ENCODING)
                            .is_some()
                        {
                            return Err(StreamError::Network(
                                "origin applied a Content-Encoding, which this crate cannot decode transparently"
                                    .to_string(),
                            ));
                        }

                        let validator = header_str(&resp, hyper::header::ETAG)
                            .map(|s| s.to_string())
                            .or_else(|| header_str(&resp, hyper::header::LAST_MODIFIED).map(|s| s.to_string()));

                        let (seekable, length, actual_offset) = if status == StatusCode::PARTIAL_CONTENT {
                            let content_range = header_str(&resp, hyper::header::CONTENT_RANGE)
                                .ok_or_else(|| StreamError::Network("206 response missing Content-Range".to_string()))?;
                            let parsed = parse_content_range(content_range)
                                .map_err(|e| StreamError::Network(format!("invalid Content-Range: {e}")))?;
                            let total = parsed.total.map(|t| t as i64).unwrap_or(-1);
                            (true, total, parsed.range.start)
                        } else {
                            if !matches!(req.if_range, None) || req.offset != 0 {
                                return Err(StreamError::Network(
                                    "origin ignored Range and returned the full representation".to_string(),
                                ));
                            }
                            let len = parse_content_length(header_str(&resp, hyper::header::CONTENT_LENGTH))
                                .map(|l| l as i64)
                                .unwrap_or(-1);
                            (false, len, 0)
                        };

                        let meta = BackendMeta {
                            seekable,
                            length,
                            headers,
                            validator,
                            requested_offset: req.offset,
                            actual_offset,
                        };

                        let body = if req.progressive {
                            HandleBody::Streaming(resp.into_body())
                        } else {
                            use hyper::body::to_bytes;
                            let whole = to_bytes(resp.into_body())
                                .await
                                .map_err(|e| StreamError::Network(e.to_string()))?;
                            HandleBody::Whole(if whole.is_empty() { None } else { Some(whole) })
                        };

                        return Ok(Box::new(HyperBackendHandle {
                            meta,
                            body,
                            offset: actual_offset,
                            bytes_read: 0,
                            aborted: false,
                        }));
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        tracing::debug!(attempt, status = %status, "retrying transient HTTP error");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }

                    return Err(StreamError::Network(format!("HTTP {status}")));
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(attempt, error = %e, "retrying after transport error");
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) => {
                    return Err(StreamError::Network(format!(
                        "{} ({})",
                        e,
                        redact_query(&req.url)
                    )));
                }
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let ms = 50u64.saturating_mul(1u64 << attempt.min(4));
    Duration::from_millis(ms.min(400))
}

/// A backend's response body, either streamed chunk-by-chunk (progressive
/// mode) or already fully read into memory at `open()` time (non-progressive
/// mode: one `buffer` event carrying the whole body, then `done`).
enum HandleBody {
    Streaming(Body),
    Whole(Option<Bytes>),
}

struct HyperBackendHandle {
    meta: BackendMeta,
    body: HandleBody,
    offset: u64,
    bytes_read: u64,
    aborted: bool,
}

#[async_trait]
impl RangeBackend for HyperBackendHandle {
    fn meta(&self) -> &BackendMeta {
        &self.meta
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        if self.aborted {
            return Err(StreamError::Aborted);
        }
        match &mut self.body {
            HandleBody::Streaming(body) => {
                use hyper::body::HttpBody;
                match body.data().await {
                    Some(Ok(bytes)) => {
                        self.offset += bytes.len() as u64;
                        self.bytes_read += bytes.len() as u64;
                        Ok(Some(bytes))
                    }
                    Some(Err(e)) => Err(StreamError::Network(e.to_string())),
                    None => Ok(None),
                }
            }
            HandleBody::Whole(slot) => match slot.take() {
                Some(bytes) => {
                    self.offset += bytes.len() as u64;
                    self.bytes_read += bytes.len() as u64;
                    Ok(Some(bytes))
                }
                None => Ok(None),
            },
        }
    }

    async fn abort(&mut self) {
        self.aborted = true;
    }
}
