use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::cache::{MemoryCache, ResponseCache};
use crate::error::{BuildError, Error};
use crate::executor::RequestExecutor;
use crate::logger::{Logger, TracingLogger};
use crate::metrics::HttpClientMetricsSnapshot;
use crate::request::Request;
use crate::response::RawResponse;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::tls::{
    TlsBackend, TlsOptions, TlsRootCertificate, TlsRootStore, default_tls_backend,
};
use crate::transport::{HyperTransport, Transport, TransportConfig};
use crate::trust::TrustValidator;
use crate::util::{parse_header_name, parse_header_value};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_CLIENT_NAME: &str = "reqrun";
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct HttpClientBuilder {
    default_headers: HeaderMap,
    request_timeout: Duration,
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    http2_only: bool,
    max_response_body_bytes: usize,
    retry_policy: Arc<dyn RetryPolicy>,
    cache: Arc<dyn ResponseCache>,
    cache_safe_methods_only: bool,
    logger: Arc<dyn Logger>,
    transport: Option<Arc<dyn Transport>>,
    tls_backend: TlsBackend,
    tls_options: TlsOptions,
    client_name: String,
    metrics_enabled: bool,
}

impl HttpClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            http2_only: false,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            retry_policy: Arc::new(ExponentialBackoff::standard()),
            cache: Arc::new(MemoryCache::new()),
            cache_safe_methods_only: false,
            logger: Arc::new(TracingLogger),
            transport: None,
            tls_backend: default_tls_backend(),
            tls_options: TlsOptions::default(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            metrics_enabled: false,
        }
    }

    /// Upper bound for one attempt, from sending the request to the last body byte.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn http2_only(mut self, http2_only: bool) -> Self {
        self.http2_only = http2_only;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    /// Header added to every request that does not already carry it.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self, BuildError> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn retry_policy<P>(self, retry_policy: P) -> Self
    where
        P: RetryPolicy + 'static,
    {
        self.retry_policy_arc(Arc::new(retry_policy))
    }

    pub fn retry_policy_arc(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the default bounded [`MemoryCache`]. Pass
    /// [`NoCache`](crate::NoCache) to turn caching off.
    ///
    /// Every 2xx response is stored, whatever the method. The fingerprint
    /// covers method, url and query but not the body, so two `POST`s to one
    /// url with different bodies share an entry. Use
    /// [`cache_safe_methods_only`](Self::cache_safe_methods_only) when that
    /// matters.
    pub fn cache<C>(self, cache: C) -> Self
    where
        C: ResponseCache + 'static,
    {
        self.cache_arc(Arc::new(cache))
    }

    /// Shares `cache` with other clients or with the caller.
    pub fn cache_arc(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Only `GET` and `HEAD` requests read from or write to the cache.
    pub fn cache_safe_methods_only(mut self, enabled: bool) -> Self {
        self.cache_safe_methods_only = enabled;
        self
    }

    pub fn logger<L>(self, logger: L) -> Self
    where
        L: Logger + 'static,
    {
        self.logger_arc(Arc::new(logger))
    }

    pub fn logger_arc(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the built-in hyper transport. Timeout, pool and tls settings
    /// are then ignored.
    pub fn transport<T>(self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = tls_backend;
        self
    }

    pub fn tls_root_store(mut self, tls_root_store: TlsRootStore) -> Self {
        self.tls_options.root_store = tls_root_store;
        self
    }

    pub fn tls_root_ca_pem(mut self, certificate_pem: impl Into<Vec<u8>>) -> Self {
        self.tls_options
            .root_certificates
            .push(TlsRootCertificate::Pem(certificate_pem.into()));
        self
    }

    pub fn tls_root_ca_der(mut self, certificate_der: impl Into<Vec<u8>>) -> Self {
        self.tls_options
            .root_certificates
            .push(TlsRootCertificate::Der(certificate_der.into()));
        self
    }

    /// Pins a DER-encoded certificate. With at least one pin, a server is
    /// trusted only if its chain verifies and contains a pinned certificate.
    pub fn pin_certificate_der(mut self, certificate_der: impl Into<Vec<u8>>) -> Self {
        self.tls_options
            .pinned_certificates
            .push(certificate_der.into());
        self
    }

    pub fn pin_certificates_der<I, C>(mut self, certificates: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        self.tls_options
            .pinned_certificates
            .extend(certificates.into_iter().map(Into::into));
        self
    }

    /// Takes over chain trust decisions entirely; configured pins are ignored.
    pub fn trust_validator<V>(mut self, validator: V) -> Self
    where
        V: TrustValidator + 'static,
    {
        self.tls_options.trust_validator = Some(Arc::new(validator));
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn try_build(self) -> Result<HttpClient, BuildError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let config = TransportConfig {
                    tls_backend: self.tls_backend,
                    tls_options: self.tls_options,
                    request_timeout: self.request_timeout,
                    connect_timeout: self.connect_timeout,
                    pool_idle_timeout: self.pool_idle_timeout,
                    pool_max_idle_per_host: self.pool_max_idle_per_host,
                    http2_only: self.http2_only,
                    max_response_body_bytes: self.max_response_body_bytes,
                };
                Arc::new(HyperTransport::build(&config)?)
            }
        };

        let executor = RequestExecutor::new(transport)
            .cache(self.cache)
            .cache_safe_methods_only(self.cache_safe_methods_only)
            .retry_policy(self.retry_policy)
            .logger(self.logger)
            .client_name(self.client_name)
            .metrics_enabled(self.metrics_enabled);

        Ok(HttpClient {
            executor: Arc::new(executor),
            default_headers: Arc::new(self.default_headers),
            tls_backend: self.tls_backend,
        })
    }

    #[track_caller]
    pub fn build(self) -> HttpClient {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build reqrun http client: {error}; use try_build() to handle configuration errors")
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap to clone; clones share the transport, cache and metrics.
#[derive(Clone, Debug)]
pub struct HttpClient {
    executor: Arc<RequestExecutor>,
    default_headers: Arc<HeaderMap>,
    tls_backend: TlsBackend,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub async fn run<T>(&self, request: Request, cancel: &CancellationToken) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.executor.run(self.prepare(request), cancel).await
    }

    pub async fn run_raw(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        self.executor.run_raw(self.prepare(request), cancel).await
    }

    /// Like [`HttpClient::run`] with a token nobody cancels.
    pub async fn send<T>(&self, request: Request) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.run(request, &CancellationToken::new()).await
    }

    pub async fn send_raw(&self, request: Request) -> Result<RawResponse, Error> {
        self.run_raw(request, &CancellationToken::new()).await
    }

    pub fn metrics_snapshot(&self) -> HttpClientMetricsSnapshot {
        self.executor.metrics_snapshot()
    }

    pub fn tls_backend(&self) -> TlsBackend {
        self.tls_backend
    }

    fn prepare(&self, request: Request) -> Request {
        if self.default_headers.is_empty() {
            request
        } else {
            request.with_default_headers(&self.default_headers)
        }
    }
}
