use std::time::Duration;

use http::Method;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Identity of the attempt currently in flight, handed to [`Logger`] hooks.
#[derive(Clone, Debug)]
pub struct Attempt {
    number: usize,
    max_attempts: Option<usize>,
    method: Method,
    uri: String,
}

impl Attempt {
    pub(crate) fn new(
        number: usize,
        max_attempts: Option<usize>,
        method: Method,
        uri: String,
    ) -> Self {
        Self {
            number,
            max_attempts,
            method,
            uri,
        }
    }

    /// 1-based attempt number.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target uri with credentials and query removed.
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Best-effort execution log. Hooks return nothing, so a logger cannot fail
/// a request.
pub trait Logger: Send + Sync {
    fn on_response(&self, _attempt: &Attempt, _status: u16, _from_cache: bool) {}

    fn on_cache_hit(&self, _attempt: &Attempt) {}

    fn on_retry_scheduled(&self, _attempt: &Attempt, _error: &Error, _delay: Duration) {}

    fn on_cancelled(&self, _attempt: &Attempt) {}
}

/// Default logger: forwards every hook to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn on_response(&self, attempt: &Attempt, status: u16, from_cache: bool) {
        debug!(
            method = %attempt.method(),
            uri = attempt.uri(),
            attempt = attempt.number(),
            status,
            from_cache,
            "response received"
        );
    }

    fn on_cache_hit(&self, attempt: &Attempt) {
        debug!(
            method = %attempt.method(),
            uri = attempt.uri(),
            "using cached response"
        );
    }

    fn on_retry_scheduled(&self, attempt: &Attempt, error: &Error, delay: Duration) {
        warn!(
            method = %attempt.method(),
            uri = attempt.uri(),
            attempt = attempt.number(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying request"
        );
    }

    fn on_cancelled(&self, attempt: &Attempt) {
        info!(
            method = %attempt.method(),
            uri = attempt.uri(),
            attempt = attempt.number(),
            "request cancelled"
        );
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {}
