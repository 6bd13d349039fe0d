use std::collections::BTreeSet;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use rand::Rng;

use crate::error::{Error, TransportErrorKind};
use crate::request::Request;

pub const RETRY_ATTEMPT_HEADER: &str = "x-retry-attempt";

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    NoRetry,
}

/// Decides whether a failed attempt is replayed and derives the replayed request.
///
/// The executor only consults the policy for errors where
/// [`Error::is_retry_candidate`] holds. `attempt` is the 1-based number of the
/// attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, error: &Error, attempt: usize) -> RetryDecision;

    /// Request for attempt `attempt + 1`. Defaults to stamping the attempt marker.
    fn next_request(&self, previous: &Request, attempt: usize) -> Request {
        stamp_retry_attempt(previous, attempt + 1)
    }

    /// Upper bound on attempts, reported to loggers when known.
    fn max_attempts(&self) -> Option<usize> {
        None
    }
}

pub fn stamp_retry_attempt(previous: &Request, attempt: usize) -> Request {
    previous.with_header(
        HeaderName::from_static(RETRY_ATTEMPT_HEADER),
        HeaderValue::from(attempt),
    )
}

/// Retries nothing; every error is returned as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn decide(&self, _error: &Error, _attempt: usize) -> RetryDecision {
        RetryDecision::NoRetry
    }

    fn max_attempts(&self) -> Option<usize> {
        Some(1)
    }
}

/// Default policy: exponential backoff over server errors and transport failures.
///
/// The delay after attempt `n` is `base_delay * 2^(n-1)`, optionally capped by
/// `max_delay` and spread by `jitter_ratio`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_ratio: f64,
    extra_retryable_statuses: BTreeSet<u16>,
    retryable_transport_kinds: BTreeSet<TransportErrorKind>,
    attempt_header: HeaderName,
}

impl ExponentialBackoff {
    pub fn standard() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            jitter_ratio: 0.0,
            extra_retryable_statuses: BTreeSet::new(),
            retryable_transport_kinds: default_retryable_transport_kinds(),
            attempt_header: HeaderName::from_static(RETRY_ATTEMPT_HEADER),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        if let Some(max_delay) = self.max_delay {
            self.max_delay = Some(max_delay.max(base_delay));
        }
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay.max(self.base_delay));
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// Also retry this non-5xx status, e.g. `429`.
    pub fn retry_status(mut self, status: u16) -> Self {
        self.extra_retryable_statuses.insert(status);
        self
    }

    pub fn retryable_transport_kinds(
        mut self,
        kinds: impl IntoIterator<Item = TransportErrorKind>,
    ) -> Self {
        self.retryable_transport_kinds = kinds.into_iter().collect();
        self
    }

    pub fn attempt_header(mut self, attempt_header: HeaderName) -> Self {
        self.attempt_header = attempt_header;
        self
    }

    fn is_retryable(&self, error: &Error) -> bool {
        match error {
            Error::ServerError { .. } => true,
            Error::Transport { kind, .. } => self.retryable_transport_kinds.contains(kind),
            other => other
                .status()
                .is_some_and(|status| self.extra_retryable_statuses.contains(&status)),
        }
    }

    pub(crate) fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1_u32 << exponent);
        let delay = match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        };
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut sampled_ms = rand::rng().random_range(low..=high);
        if let Some(max_delay) = self.max_delay {
            let max_ms = max_delay.as_millis().min(u64::MAX as u128) as u64;
            sampled_ms = sampled_ms.min(max_ms.max(1));
        }
        Duration::from_millis(sampled_ms)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, error: &Error, attempt: usize) -> RetryDecision {
        if attempt >= self.max_attempts || !self.is_retryable(error) {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff_for_attempt(attempt))
    }

    fn next_request(&self, previous: &Request, attempt: usize) -> Request {
        previous.with_header(self.attempt_header.clone(), HeaderValue::from(attempt + 1))
    }

    fn max_attempts(&self) -> Option<usize> {
        Some(self.max_attempts)
    }
}

fn default_retryable_transport_kinds() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::Dns,
        TransportErrorKind::Connect,
        TransportErrorKind::Tls,
        TransportErrorKind::Read,
        TransportErrorKind::Timeout,
        TransportErrorKind::BodyTooLarge,
        TransportErrorKind::Other,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;
    use http::header::HeaderName;

    use super::{ExponentialBackoff, NeverRetry, RetryDecision, RetryPolicy};
    use crate::error::{Error, TransportErrorKind};
    use crate::request::Request;

    fn server_error(status: u16) -> Error {
        Error::ServerError {
            status,
            method: Method::GET,
            uri: "https://example.com/get".to_owned(),
            body: String::new(),
        }
    }

    fn client_error(status: u16) -> Error {
        Error::ClientError {
            status,
            method: Method::GET,
            uri: "https://example.com/get".to_owned(),
            body: String::new(),
        }
    }

    fn transport_error(kind: TransportErrorKind) -> Error {
        Error::Transport {
            kind,
            method: Method::GET,
            uri: "https://example.com/get".to_owned(),
            source: "connection reset".into(),
        }
    }

    #[test]
    fn standard_policy_doubles_delay_per_attempt() {
        let policy = ExponentialBackoff::standard();
        assert_eq!(
            policy.decide(&server_error(503), 1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(&server_error(503), 2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn standard_policy_stops_at_max_attempts() {
        let policy = ExponentialBackoff::standard();
        assert_eq!(policy.decide(&server_error(503), 3), RetryDecision::NoRetry);
        assert_eq!(policy.decide(&server_error(503), 7), RetryDecision::NoRetry);
    }

    #[test]
    fn client_errors_are_not_retried_by_default() {
        let policy = ExponentialBackoff::standard();
        assert_eq!(policy.decide(&client_error(404), 1), RetryDecision::NoRetry);
        assert_eq!(policy.decide(&client_error(429), 1), RetryDecision::NoRetry);

        let policy = policy.retry_status(429);
        assert!(matches!(
            policy.decide(&client_error(429), 1),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(&client_error(404), 1), RetryDecision::NoRetry);
    }

    #[test]
    fn transport_failures_follow_configured_kinds() {
        let policy = ExponentialBackoff::standard();
        assert!(matches!(
            policy.decide(&transport_error(TransportErrorKind::Connect), 1),
            RetryDecision::RetryAfter(_)
        ));

        let policy = policy.retryable_transport_kinds([TransportErrorKind::Timeout]);
        assert_eq!(
            policy.decide(&transport_error(TransportErrorKind::Tls), 1),
            RetryDecision::NoRetry
        );
        assert!(matches!(
            policy.decide(&transport_error(TransportErrorKind::Timeout), 1),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn max_delay_caps_exponential_growth() {
        let policy = ExponentialBackoff::standard()
            .max_attempts(10)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(250));
        assert_eq!(policy.backoff_for_attempt(9), Duration::from_millis(250));
    }

    #[test]
    fn jittered_backoff_never_exceeds_configured_max_delay() {
        let policy = ExponentialBackoff::standard()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(120))
            .jitter_ratio(1.0);

        for _ in 0..256 {
            let backoff = policy.backoff_for_attempt(3);
            assert!(backoff <= Duration::from_millis(120));
        }
    }

    #[test]
    fn next_request_stamps_following_attempt_number() {
        let policy = ExponentialBackoff::standard();
        let first = Request::get("https://example.com/get")
            .build()
            .expect("request should build");
        let second = policy.next_request(&first, 1);
        let third = policy.next_request(&second, 2);

        assert!(first.header("x-retry-attempt").is_none());
        assert_eq!(
            second.header("x-retry-attempt").map(|value| value.as_bytes()),
            Some(&b"2"[..])
        );
        assert_eq!(
            third.header("x-retry-attempt").map(|value| value.as_bytes()),
            Some(&b"3"[..])
        );
        assert_eq!(first.fingerprint(), third.fingerprint());
    }

    #[test]
    fn attempt_header_name_is_configurable() {
        let policy =
            ExponentialBackoff::standard().attempt_header(HeaderName::from_static("x-attempt"));
        let first = Request::get("https://example.com/get")
            .build()
            .expect("request should build");
        let second = policy.next_request(&first, 1);
        assert!(second.header("x-attempt").is_some());
        assert!(second.header("x-retry-attempt").is_none());
    }

    #[test]
    fn never_retry_declines_everything() {
        assert_eq!(NeverRetry.decide(&server_error(503), 1), RetryDecision::NoRetry);
        assert_eq!(
            NeverRetry.decide(&transport_error(TransportErrorKind::Read), 1),
            RetryDecision::NoRetry
        );
    }
}
