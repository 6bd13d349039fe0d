use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_writes: u64,
    pub cancelled: u64,
    pub transport_errors: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct HttpClientMetrics {
    enabled: bool,
    inner: Arc<HttpClientMetricsInner>,
}

#[derive(Debug, Default)]
struct HttpClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_writes: AtomicU64,
    cancelled: AtomicU64,
    transport_errors: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: HttpClientMetrics,
}

impl HttpClientMetrics {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: Arc::default(),
        }
    }

    pub(crate) fn record_request_started(&self) {
        if self.enabled {
            self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        if self.enabled {
            self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        }
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_retry(&self) {
        if self.enabled {
            self.inner.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        if self.enabled {
            self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_cache_write(&self) {
        if self.enabled {
            self.inner.cache_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_response_status(&self, status: u16) {
        if self.enabled {
            let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
            *status_counts.entry(status).or_insert(0) += 1;
        }
    }

    pub(crate) fn record_request_completed<T>(&self, result: &Result<T, Error>, latency: Duration) {
        if !self.enabled {
            return;
        }
        self.record_latency(latency);
        let error = match result {
            Ok(_) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) => error,
        };

        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        let error_key = match error {
            Error::Transport { kind, .. } => {
                self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                format!("transport:{kind}")
            }
            Error::Cancelled { .. } => {
                self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
                error.code().as_str().to_owned()
            }
            other => match other.status() {
                Some(status) => format!("{}:{status}", other.code().as_str()),
                None => other.code().as_str().to_owned(),
            },
        };
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self) -> HttpClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        HttpClientMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_writes: self.inner.cache_writes.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.metrics.enabled {
            self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
