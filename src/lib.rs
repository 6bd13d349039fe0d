//! `reqrun` executes HTTP requests with a response cache, pluggable retries,
//! cancellation and certificate pinning, and decodes JSON payloads.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqrun::prelude::{CancellationToken, ExponentialBackoff, HttpClient, MemoryCache, Request};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder()
//!         .client_name("my-sdk")
//!         .request_timeout(Duration::from_secs(3))
//!         .retry_policy(
//!             ExponentialBackoff::standard()
//!                 .max_attempts(3)
//!                 .base_delay(Duration::from_millis(100))
//!                 .max_delay(Duration::from_millis(800)),
//!         )
//!         .cache(MemoryCache::with_capacity_bytes(1024 * 1024))
//!         .try_build()?;
//!
//!     let cancel = CancellationToken::new();
//!     let request = Request::get("https://api.example.com/v1/items/42")
//!         .query_pair("expand", "owner")
//!         .build()?;
//!     let item: Item = client.run(request, &cancel).await?;
//!
//!     println!("item id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Execution Order
//!
//! - Cancellation is checked before every attempt and preempts network I/O
//!   and backoff sleeps.
//! - The cache is consulted before the network; only 2xx network responses
//!   are stored. Clients start with a bounded [`MemoryCache`]; pass
//!   [`NoCache`] to turn it off.
//! - Server errors and transport failures are retried per policy; cast and
//!   decoding failures never are.

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    not(feature = "tls-rustls-aws-lc-rs")
))]
compile_error!(
    "reqrun requires one TLS backend feature: enable `tls-rustls-ring` or `tls-rustls-aws-lc-rs`"
);

mod cache;
mod classify;
mod client;
mod error;
mod executor;
mod logger;
mod metrics;
mod request;
mod response;
mod retry;
mod tls;
mod transport;
mod trust;
mod util;

pub use crate::cache::{
    DEFAULT_MEMORY_CACHE_CAPACITY_BYTES, Fingerprint, MemoryCache, NoCache, ResponseCache,
};
pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::error::{BuildError, Error, ErrorCode, TransportErrorKind, TransportFailure};
pub use crate::executor::RequestExecutor;
pub use crate::logger::{Attempt, Logger, NoopLogger, TracingLogger};
pub use crate::metrics::HttpClientMetricsSnapshot;
pub use crate::request::{Body, Request, RequestBuilder};
pub use crate::response::RawResponse;
pub use crate::retry::{
    ExponentialBackoff, NeverRetry, RETRY_ATTEMPT_HEADER, RetryDecision, RetryPolicy,
    stamp_retry_attempt,
};
pub use crate::tls::{TlsBackend, TlsRootStore};
pub use crate::transport::Transport;
pub use crate::trust::{CertificateChain, CertificatePinning, TrustValidator};
pub use tokio_util::sync::CancellationToken;

pub type ReqrunResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BuildError, CancellationToken, Error, ErrorCode, ExponentialBackoff, HttpClient,
        HttpClientMetricsSnapshot, MemoryCache, NeverRetry, RawResponse, ReqrunResult, Request,
        RetryDecision, RetryPolicy, TlsBackend, TransportErrorKind,
    };
}
