use std::sync::Arc;
use std::time::Instant;

use http::Method;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::cache::{NoCache, ResponseCache};
use crate::classify::{classify_response, classify_transport_failure};
use crate::error::Error;
use crate::logger::{Attempt, Logger, TracingLogger};
use crate::metrics::{HttpClientMetrics, HttpClientMetricsSnapshot};
use crate::request::Request;
use crate::response::RawResponse;
use crate::retry::{ExponentialBackoff, RetryDecision, RetryPolicy};
use crate::transport::Transport;
use crate::util::redact_url_for_logs;

const DEFAULT_CLIENT_NAME: &str = "reqrun";

/// Runs one request to a single terminal outcome.
///
/// Every attempt first consults the cache, then the transport. Failed attempts
/// are replayed as the retry policy decides. The cancellation token is checked
/// before each attempt and raced against every suspension point, so a
/// cancelled call returns [`Error::Cancelled`] without further network or
/// cache work.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ResponseCache>,
    retry_policy: Arc<dyn RetryPolicy>,
    logger: Arc<dyn Logger>,
    metrics: HttpClientMetrics,
    client_name: String,
    cache_safe_methods_only: bool,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestExecutor")
            .field("client_name", &self.client_name)
            .field("max_attempts", &self.retry_policy.max_attempts())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Executor without a cache, with `ExponentialBackoff::standard()`,
    /// tracing logs and metrics disabled.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: Arc::new(NoCache),
            retry_policy: Arc::new(ExponentialBackoff::standard()),
            logger: Arc::new(TracingLogger),
            metrics: HttpClientMetrics::new(false),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            cache_safe_methods_only: false,
        }
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Restricts cache reads and writes to `GET` and `HEAD` requests.
    pub fn cache_safe_methods_only(mut self, enabled: bool) -> Self {
        self.cache_safe_methods_only = enabled;
        self
    }

    pub fn retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics = HttpClientMetrics::new(enabled);
        self
    }

    pub fn metrics_snapshot(&self) -> HttpClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Executes `request` and decodes the 2xx body as JSON.
    ///
    /// A body that fails to decode yields [`Error::Decoding`] and is never
    /// retried; the response has already been cached at that point.
    pub async fn run<T>(&self, request: Request, cancel: &CancellationToken) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.observe(async {
            let response = self.execute_with_retry(request, cancel).await?;
            response.json::<T>()
        })
        .await
    }

    /// Executes `request` and returns the 2xx response undecoded.
    pub async fn run_raw(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        self.observe(self.execute_with_retry(request, cancel)).await
    }

    async fn observe<T>(&self, execution: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        self.metrics.record_request_started();
        let _in_flight = self.metrics.enter_in_flight();
        let started = Instant::now();
        let result = execution.await;
        self.metrics
            .record_request_completed(&result, started.elapsed());
        result
    }

    async fn execute_with_retry(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        let method = request.method().clone();
        let redacted_uri = redact_url_for_logs(request.url());
        let max_attempts = self.retry_policy.max_attempts();
        let mut current = request;
        let mut attempt_number = 1_usize;

        loop {
            let attempt = Attempt::new(
                attempt_number,
                max_attempts,
                method.clone(),
                redacted_uri.clone(),
            );
            let span = info_span!(
                "reqrun.request",
                client = %self.client_name,
                method = %method,
                uri = %redacted_uri,
                attempt = attempt_number,
            );

            let error = match self
                .run_attempt(&current, &attempt, cancel)
                .instrument(span.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };
            if !error.is_retry_candidate() {
                return Err(error);
            }

            let delay = match self.retry_policy.decide(&error, attempt_number) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::NoRetry => return Err(error),
            };
            self.logger.on_retry_scheduled(&attempt, &error, delay);
            self.metrics.record_retry();

            let backoff_completed = async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = sleep(delay) => true,
                }
            }
            .instrument(span)
            .await;
            if !backoff_completed {
                self.logger.on_cancelled(&attempt);
                return Err(cancelled(&method, &redacted_uri));
            }

            current = self.retry_policy.next_request(&current, attempt_number);
            attempt_number += 1;
        }
    }

    async fn run_attempt(
        &self,
        request: &Request,
        attempt: &Attempt,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, Error> {
        if cancel.is_cancelled() {
            self.logger.on_cancelled(attempt);
            return Err(cancelled(attempt.method(), attempt.uri()));
        }

        let fingerprint = request.fingerprint();
        let cacheable = !self.cache_safe_methods_only || is_safe_method(request.method());
        let cached = if cacheable {
            self.cache.get(&fingerprint)
        } else {
            None
        };
        let (response, from_cache) = match cached {
            Some(response) => {
                self.logger.on_cache_hit(attempt);
                self.metrics.record_cache_hit();
                (response, true)
            }
            None => {
                debug!("sending request");
                let exchange = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.transport.execute(request, cancel) => Some(result),
                };
                match exchange {
                    None => {
                        self.logger.on_cancelled(attempt);
                        return Err(cancelled(attempt.method(), attempt.uri()));
                    }
                    Some(Err(failure)) => {
                        return Err(classify_transport_failure(
                            failure,
                            attempt.method(),
                            attempt.uri(),
                        ));
                    }
                    Some(Ok(response)) => (response, false),
                }
            }
        };

        self.metrics.record_response_status(response.status());
        self.logger
            .on_response(attempt, response.status(), from_cache);
        classify_response(&response, attempt.method(), attempt.uri())?;

        if cacheable && !from_cache {
            self.cache.put(fingerprint, response.clone());
            self.metrics.record_cache_write();
        }
        Ok(response)
    }
}

fn is_safe_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn cancelled(method: &Method, uri: &str) -> Error {
    Error::Cancelled {
        method: method.clone(),
        uri: uri.to_owned(),
    }
}
