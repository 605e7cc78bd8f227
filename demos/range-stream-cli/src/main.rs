use anyhow::Context;
use clap::Parser;
use http_range_stream::{Stream, StreamConfig};
use url::Url;

/// Fetches a byte range from a URL through `http-range-stream`, exercising
/// load/seek/read end to end against a real origin.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// URL of the resource to stream.
    url: String,

    /// Absolute byte offset to seek to before reading.
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Number of bytes to read.
    #[arg(long, default_value_t = 4096)]
    length: u64,

    /// Chunk size for each underlying Range request, in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    chunk_size: u64,

    /// Extra request header, formatted as `Name: value`. May be repeated.
    #[arg(long = "header")]
    headers: Vec<String>,
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not in \"Name: value\" form"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let url = Url::parse(&args.url).with_context(|| format!("invalid URL: {}", args.url))?;

    let mut config = StreamConfig::new(url);
    config.options.chunk_size = args.chunk_size;
    for header in &args.headers {
        config.request_headers.push(parse_header(header)?);
    }

    let stream = Stream::open(config)?;
    stream.load().await.context("load() failed")?;

    let snapshot = stream.snapshot().await;
    tracing::info!(
        length = snapshot.length,
        seekable = snapshot.seekable,
        "stream loaded"
    );

    stream.seek(args.offset).await.context("seek() failed")?;
    let bytes = stream.read(args.length).await.context("read() failed")?;

    println!(
        "read {} bytes at offset {} (requested {})",
        bytes.len(),
        args.offset,
        args.length
    );
    let preview_len = bytes.len().min(64);
    println!("{:02x?}", &bytes[..preview_len]);

    let telemetry = stream.telemetry_snapshot().await;
    tracing::info!(
        range_requests = telemetry.range_requests,
        bytes_downloaded = telemetry.bytes_downloaded,
        "done"
    );

    Ok(())
}
