//! A seekable, asynchronously buffered byte-stream abstraction over a
//! remote HTTP resource, built on top of `segment-cache`.
//!
//! Open a [`Stream`] against a URL, call [`Stream::load`] to discover its
//! length and seekability, then `seek`/`read`/`buffer` it as if it were a
//! local random-access file. Bytes arrive via HTTP `Range` requests behind
//! the [`RangeBackend`] trait, so the wire transport is swappable; the
//! default, non-WASM transport is `hyper`-based ([`HyperRangeBackend`]).

mod backend;
mod config;
mod error;
#[cfg(not(target_arch = "wasm32"))]
mod hyper_backend;
mod stream;
mod telemetry;

pub use backend::{BackendMeta, BackendRequest, RangeBackend, RangeBackendFactory};
pub use config::{StreamConfig, StreamOptions};
pub use error::StreamError;
#[cfg(not(target_arch = "wasm32"))]
pub use hyper_backend::HyperRangeBackend;
pub use stream::{Stream, StreamSnapshot};
pub use telemetry::StreamTelemetry;
