use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{BuildError, TransportErrorKind, TransportFailure};
use crate::request::Request;
use crate::response::RawResponse;
use crate::tls::{TlsBackend, TlsOptions, build_rustls_tls_config};
use crate::util::classify_transport_error;

/// Performs one network exchange for a request.
///
/// Implementations own DNS, connection reuse and TLS. The executor races the
/// returned future against `cancel` and drops it on cancellation, so
/// implementations must release their I/O on drop; observing `cancel`
/// directly is optional.
pub trait Transport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RawResponse, TransportFailure>>;
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Clone, Debug)]
pub(crate) struct TransportConfig {
    pub(crate) tls_backend: TlsBackend,
    pub(crate) tls_options: TlsOptions,
    pub(crate) request_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) http2_only: bool,
    pub(crate) max_response_body_bytes: usize,
}

/// hyper-util pooled client over rustls, HTTP/1.1 and HTTP/2.
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
    request_timeout: Duration,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("request_timeout", &self.request_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

enum ReadBodyError {
    Read(hyper::Error),
    TooLarge { actual_bytes: usize },
}

async fn read_all_body_limited(mut body: Incoming, max_bytes: usize) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}

fn build_http_request(request: &Request) -> Result<http::Request<Full<Bytes>>, TransportFailure> {
    let mut request_builder = http::Request::builder()
        .method(request.method().clone())
        .uri(request.url().as_str());
    for (name, value) in request.headers() {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(Full::new(request.body().to_bytes()))
        .map_err(|source| TransportFailure::new(TransportErrorKind::Other, source))
}

impl HyperTransport {
    pub(crate) fn build(config: &TransportConfig) -> Result<Self, BuildError> {
        let tls_config = build_rustls_tls_config(config.tls_backend, &config.tls_options)?;
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(config.connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(config.http2_only)
            .build(https);
        Ok(Self {
            client,
            request_timeout: config.request_timeout,
            max_response_body_bytes: config.max_response_body_bytes,
        })
    }

    async fn exchange(&self, request: &Request) -> Result<RawResponse, TransportFailure> {
        let http_request = build_http_request(request)?;
        let response = self.client.request(http_request).await.map_err(|source| {
            let kind = classify_transport_error(&source);
            TransportFailure::new(kind, source)
        })?;

        let (parts, body) = response.into_parts();
        let body = read_all_body_limited(body, self.max_response_body_bytes)
            .await
            .map_err(|error| match error {
                ReadBodyError::Read(source) => {
                    TransportFailure::new(TransportErrorKind::Read, source)
                }
                ReadBodyError::TooLarge { actual_bytes } => TransportFailure::new(
                    TransportErrorKind::BodyTooLarge,
                    format!(
                        "response body too large ({actual_bytes} bytes > {} bytes)",
                        self.max_response_body_bytes
                    ),
                ),
            })?;
        Ok(RawResponse::new(parts.status.as_u16(), parts.headers, body))
    }
}

impl Transport for HyperTransport {
    fn execute<'a>(
        &'a self,
        request: &'a Request,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RawResponse, TransportFailure>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportFailure::new(
                    TransportErrorKind::Other,
                    "exchange aborted by cancellation",
                )),
                result = timeout(self.request_timeout, self.exchange(request)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(TransportFailure::new(
                        TransportErrorKind::Timeout,
                        format!("no complete response within {}ms", self.request_timeout.as_millis()),
                    )),
                },
            }
        })
    }
}
