use http_range_stream::{Stream, StreamConfig, StreamError};
use hyper::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;

#[derive(Default)]
struct Counters {
    range_requests: AtomicUsize,
}

struct State {
    image: Vec<u8>,
    etag: String,
    counters: Counters,
    /// First `N` GET requests see a deliberately wrong `Content-Range`
    /// start, simulating a misbehaving range cache.
    wrong_range_once: std::sync::atomic::AtomicBool,
}

async fn start_server(image: Vec<u8>, etag: &str, wrong_range_once: bool) -> (Url, Arc<State>, oneshot::Sender<()>) {
    let state = Arc::new(State {
        image,
        etag: etag.to_string(),
        counters: Counters::default(),
        wrong_range_once: std::sync::atomic::AtomicBool::new(wrong_range_once),
    });

    let make_svc = {
        let state = state.clone();
        make_service_fn(move |_conn| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
        })
    };

    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let builder = Server::try_bind(&addr).expect("bind");
    let local_addr = builder.local_addr();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = builder
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
    tokio::spawn(server);

    let url = Url::parse(&format!("http://{local_addr}/asset.bin")).expect("url");
    (url, state, shutdown_tx)
}

fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (s, e) = spec.split_once('-')?;
    let start: u64 = s.parse().ok()?;
    let end_inclusive: u64 = e.parse().ok()?;
    let end_exclusive = (end_inclusive + 1).min(total);
    Some((start, end_exclusive))
}

async fn handle(req: Request<Body>, state: Arc<State>) -> Result<Response<Body>, Infallible> {
    if *req.method() != Method::GET {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(resp);
    }

    let total = state.image.len() as u64;

    if let Some(range) = req.headers().get(RANGE).and_then(|v| v.to_str().ok()) {
        let Some((start, end)) = parse_range(range, total) else {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            return Ok(resp);
        };
        state.counters.range_requests.fetch_add(1, Ordering::SeqCst);

        // The body always matches what was actually requested — only the *reported*
        // Content-Range start lies on the first request, mimicking a misbehaving
        // cache that serves correct bytes under a stale header.
        let reported_start = if state.wrong_range_once.swap(false, Ordering::SeqCst) {
            start + 1
        } else {
            start
        };

        let body = state.image[start as usize..end as usize].to_vec();
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = StatusCode::PARTIAL_CONTENT;
        resp.headers_mut().insert(
            CONTENT_RANGE,
            format!("bytes {}-{}/{}", reported_start, end - 1, total)
                .parse()
                .unwrap(),
        );
        resp.headers_mut()
            .insert(hyper::header::ETAG, state.etag.parse().unwrap());
        return Ok(resp);
    }

    let mut resp = Response::new(Body::from(state.image.clone()));
    *resp.status_mut() = StatusCode::OK;
    resp.headers_mut()
        .insert(CONTENT_LENGTH, total.to_string().parse().unwrap());
    resp.headers_mut()
        .insert(hyper::header::ETAG, state.etag.parse().unwrap());
    Ok(resp)
}

fn config_for(url: Url, chunk_size: u64) -> StreamConfig {
    let mut config = StreamConfig::new(url);
    config.options.chunk_size = chunk_size;
    config.options.cache_size = 0;
    config.options.read_ahead = false;
    config
}

#[tokio::test(flavor = "current_thread")]
async fn load_then_read_returns_requested_bytes() {
    let image: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image.clone(), "etag-v1", false).await;

    let stream = Stream::open(config_for(url, 1024)).unwrap();
    stream.load().await.unwrap();
    assert_eq!(stream.length().await, image.len() as i64);
    assert!(stream.seekable().await);

    let bytes = stream.read(200).await.unwrap();
    assert_eq!(&bytes[..], &image[0..200]);

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn second_read_of_cached_range_issues_no_extra_request() {
    let image: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let (url, state, shutdown) = start_server(image.clone(), "etag-v2", false).await;

    let stream = Stream::open(config_for(url, 1024)).unwrap();
    stream.load().await.unwrap();

    stream.seek(0).await.unwrap();
    let first = stream.read(200).await.unwrap();
    assert_eq!(&first[..], &image[0..200]);
    let after_first = state.counters.range_requests.load(Ordering::SeqCst);

    stream.seek(0).await.unwrap();
    let second = stream.read(200).await.unwrap();
    assert_eq!(&second[..], &image[0..200]);
    assert_eq!(
        state.counters.range_requests.load(Ordering::SeqCst),
        after_first,
        "re-reading an already-cached range should not re-fetch"
    );

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn seek_then_read_spans_multiple_chunks() {
    let image: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image.clone(), "etag-v3", false).await;

    let stream = Stream::open(config_for(url, 1024)).unwrap();
    stream.load().await.unwrap();

    stream.seek(1000).await.unwrap();
    let bytes = stream.read(200).await.unwrap();
    assert_eq!(&bytes[..], &image[1000..1200]);

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn abort_mid_buffer_rejects_with_aborted_and_allows_reuse() {
    let image: Vec<u8> = (0..(8 * 1024 * 1024u32)).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image.clone(), "etag-v4", false).await;

    let stream = Stream::open(config_for(url, 1024 * 1024)).unwrap();
    stream.load().await.unwrap();

    let stream2 = stream.clone();
    let reader = tokio::spawn(async move { stream2.read(image.len() as u64).await });

    stream.abort().await;

    let result = reader.await.unwrap();
    assert!(
        matches!(result, Err(StreamError::Aborted)),
        "abort() must reject the in-flight read with Aborted, got {result:?}"
    );

    assert!(!stream.buffering().await);
    stream.seek(0).await.unwrap();

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn validator_is_captured_from_etag_at_load() {
    let image: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image.clone(), "etag-v5", false).await;

    let stream = Stream::open(config_for(url, 1024)).unwrap();
    stream.load().await.unwrap();
    assert_eq!(stream.validator().await.as_deref(), Some("etag-v5"));

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn pinned_validator_mismatch_fails_load() {
    let image: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image, "etag-actual", false).await;

    let mut config = config_for(url, 1024);
    config.validator = Some("etag-expected".to_string());
    let stream = Stream::open(config).unwrap();

    let err = stream.load().await.unwrap_err();
    assert!(matches!(err, StreamError::ValidatorMismatch { .. }));

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn range_cache_anomaly_is_recovered_transparently() {
    let image: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let (url, state, shutdown) = start_server(image.clone(), "etag-anomaly", true).await;

    let stream = Stream::open(config_for(url, 1024)).unwrap();
    stream.load().await.unwrap();

    let bytes = stream.read(64).await.unwrap();
    assert_eq!(&bytes[..], &image[0..64]);
    assert!(
        state.counters.range_requests.load(Ordering::SeqCst) >= 2,
        "the anomalous first response should trigger a cache-busting retry"
    );

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn load_called_twice_is_invalid_state() {
    let image: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let (url, _state, shutdown) = start_server(image, "etag-v6", false).await;

    let stream = Stream::open(config_for(url, 256)).unwrap();
    stream.load().await.unwrap();
    let err = stream.load().await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidState(_)));

    let _ = shutdown.send(());
}

#[tokio::test(flavor = "current_thread")]
async fn reject_absurd_chunk_size() {
    let url = Url::parse("http://127.0.0.1:1/asset.bin").unwrap();
    let mut config = StreamConfig::new(url);
    config.options.chunk_size = 128 * 1024 * 1024;
    let err = Stream::open(config).unwrap_err();
    assert!(matches!(err, StreamError::InvalidInput(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn reject_zero_max_retries() {
    let url = Url::parse("http://127.0.0.1:1/asset.bin").unwrap();
    let mut config = StreamConfig::new(url);
    config.options.max_retries = 0;
    let err = Stream::open(config).unwrap_err();
    assert!(matches!(err, StreamError::InvalidInput(_)));
}
