//! Retry policy for outbound requests.
//!
//! [`RetryConfig::decide`] is a pure function of one failed attempt. [`RetryingTransport`] wraps
//! any [`Transport`] and drives the attempt loop, sleeping on its [`Clock`] between attempts.
use std::time::Duration;

use rand::{thread_rng, Rng};
use reqwest::Method;

use crate::{
    clock::{elapsed, Clock, SystemClock},
    transport::{HttpRequest, HttpResponse, Transport, TransportError},
};

/// Retry behavior for requests.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    ///
    /// Defaults to [`RetryConfig::DEFAULT_MAX_RETRIES`].
    pub max_retries: u32,
    /// Base of the exponential schedule: retry `n` waits `2^n * base_delay` plus jitter.
    ///
    /// Defaults to [`RetryConfig::DEFAULT_BASE_DELAY`].
    pub base_delay: Duration,
    /// Upper bound of the random jitter, as a fraction of the computed delay.
    ///
    /// Defaults to [`RetryConfig::DEFAULT_MAX_JITTER`].
    pub max_jitter: f64,
    /// When `false`, time spent on the previous attempt and the backoff delay are deducted from
    /// the request timeout, and the sequence stops once the budget is used up. When `true`, every
    /// attempt gets the full timeout.
    pub reset_timeout_on_retry: bool,
}

impl RetryConfig {
    /// Default value for [`RetryConfig::max_retries`].
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Default value for [`RetryConfig::base_delay`].
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
    /// Default value for [`RetryConfig::max_jitter`].
    pub const DEFAULT_MAX_JITTER: f64 = 0.2;

    /// Create a new `RetryConfig` using default configuration.
    pub fn new() -> RetryConfig {
        RetryConfig::default()
    }

    /// Configuration that never retries.
    pub fn disabled() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        }
    }

    /// Update [`RetryConfig::max_retries`].
    pub fn with_max_retries(mut self, max_retries: u32) -> RetryConfig {
        self.max_retries = max_retries;
        self
    }

    /// Update [`RetryConfig::reset_timeout_on_retry`].
    pub fn with_reset_timeout_on_retry(mut self, reset: bool) -> RetryConfig {
        self.reset_timeout_on_retry = reset;
        self
    }

    /// Decide what to do after `attempt` failed.
    ///
    /// `jitter` is a random sample in `[0, 1)` scaled by [`RetryConfig::max_jitter`].
    pub fn decide(&self, attempt: &FailedAttempt<'_>, jitter: f64) -> RetryDecision {
        if !attempt.retry_allowed
            || attempt.retry_count >= self.max_retries
            || !is_retryable(attempt.method, attempt.error)
        {
            return RetryDecision::GiveUp;
        }

        let retry_number = attempt.retry_count + 1;
        let delay = self.backoff(retry_number, jitter);

        let timeout = match attempt.timeout {
            Some(timeout) if !self.reset_timeout_on_retry => {
                match timeout
                    .checked_sub(attempt.duration)
                    .and_then(|left| left.checked_sub(delay))
                {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => return RetryDecision::GiveUp,
                }
            }
            timeout => timeout,
        };

        RetryDecision::Retry { delay, timeout }
    }

    /// Delay before retry number `retry_number` (1-based).
    pub fn backoff(&self, retry_number: u32, jitter: f64) -> Duration {
        let factor = 2u32.checked_pow(retry_number).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let max_jitter = if self.max_jitter.is_finite() && self.max_jitter >= 0.0 {
            self.max_jitter
        } else {
            0.0
        };
        delay.saturating_add(delay.mul_f64(max_jitter * jitter))
    }
}

impl Default for RetryConfig {
    fn default() -> RetryConfig {
        RetryConfig {
            max_retries: RetryConfig::DEFAULT_MAX_RETRIES,
            base_delay: RetryConfig::DEFAULT_BASE_DELAY,
            max_jitter: RetryConfig::DEFAULT_MAX_JITTER,
            reset_timeout_on_retry: false,
        }
    }
}

/// Everything the policy needs to know about a failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttempt<'a> {
    /// Retries already performed before this attempt.
    pub retry_count: u32,
    /// Method of the request.
    pub method: &'a Method,
    /// Whether the request opted into retries at all.
    pub retry_allowed: bool,
    /// How the attempt failed.
    pub error: &'a TransportError,
    /// Timeout the attempt ran with.
    pub timeout: Option<Duration>,
    /// How long the attempt took.
    pub duration: Duration,
}

/// Outcome of [`RetryConfig::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then send again with `timeout`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
        /// Timeout for the next attempt.
        timeout: Option<Duration>,
    },
    /// Fail with the last error.
    GiveUp,
}

/// Methods that may be repeated without changing the outcome.
pub fn is_idempotent(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::OPTIONS,
        Method::PUT,
        Method::DELETE,
    ]
    .contains(method)
}

/// A failure is retryable when no response arrived because of a transient network problem, or
/// when an idempotent request received a 5xx.
pub fn is_retryable(method: &Method, error: &TransportError) -> bool {
    match error {
        TransportError::Network(err) => err.kind.is_retry_allowed(),
        TransportError::Status { status, .. } => {
            (500..=599).contains(status) && is_idempotent(method)
        }
    }
}

/// [`Transport`] decorator applying a [`RetryConfig`].
pub struct RetryingTransport<T, C = SystemClock> {
    inner: T,
    config: RetryConfig,
    clock: C,
}

impl<T: Transport> RetryingTransport<T> {
    /// Wrap `inner`, sleeping on the system clock.
    pub fn new(inner: T, config: RetryConfig) -> Self {
        RetryingTransport::with_clock(inner, config, SystemClock)
    }
}

impl<T: Transport, C: Clock> RetryingTransport<T, C> {
    /// Wrap `inner`, measuring and sleeping on `clock`.
    pub fn with_clock(inner: T, config: RetryConfig, clock: C) -> Self {
        RetryingTransport {
            inner,
            config,
            clock,
        }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport, C: Clock> Transport for RetryingTransport<T, C> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut request = request.clone();
        let mut retry_count = 0;

        loop {
            let started_at = self.clock.now();
            let error = match self.inner.send(&request) {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let attempt = FailedAttempt {
                retry_count,
                method: &request.method,
                retry_allowed: request.retry_allowed,
                error: &error,
                timeout: request.timeout,
                duration: elapsed(started_at, self.clock.now()),
            };

            match self.config.decide(&attempt, thread_rng().gen::<f64>()) {
                RetryDecision::GiveUp => return Err(error),
                RetryDecision::Retry { delay, timeout } => {
                    retry_count += 1;
                    log::warn!(target: "joystick",
                               method:display = request.method,
                               url:display = request.url,
                               retry = retry_count,
                               delay_ms = delay.as_millis() as u64;
                               "retrying request after error: {}", error);
                    self.clock.sleep(delay);
                    request.timeout = timeout;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;
    use crate::{clock::ManualClock, error::NetworkErrorKind, NetworkError};

    fn status(status: u16) -> TransportError {
        TransportError::Status {
            status,
            message: String::new(),
        }
    }

    fn network(kind: NetworkErrorKind) -> TransportError {
        TransportError::Network(NetworkError::new(kind, "boom"))
    }

    fn attempt<'a>(method: &'a Method, error: &'a TransportError) -> FailedAttempt<'a> {
        FailedAttempt {
            retry_count: 0,
            method,
            retry_allowed: true,
            error,
            timeout: None,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn classifies_retryable_failures() {
        assert!(is_retryable(&Method::GET, &status(500)));
        assert!(is_retryable(&Method::PUT, &status(599)));
        assert!(!is_retryable(&Method::POST, &status(503)));
        assert!(!is_retryable(&Method::GET, &status(404)));
        assert!(!is_retryable(&Method::GET, &status(302)));

        assert!(is_retryable(&Method::POST, &network(NetworkErrorKind::Connect)));
        assert!(!is_retryable(&Method::GET, &network(NetworkErrorKind::Timeout)));
        assert!(!is_retryable(&Method::GET, &network(NetworkErrorKind::Tls)));
        assert!(!is_retryable(&Method::GET, &network(NetworkErrorKind::Dns)));
        assert!(!is_retryable(&Method::GET, &network(NetworkErrorKind::Cancelled)));
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(1, 0.0), Duration::from_millis(200));
        assert_eq!(config.backoff(2, 0.0), Duration::from_millis(400));
        assert_eq!(config.backoff(3, 0.0), Duration::from_millis(800));
        assert_eq!(config.backoff(1, 1.0), Duration::from_millis(240));
        assert_eq!(config.backoff(3, 0.5), Duration::from_millis(880));
        // out of range samples are clamped
        assert_eq!(config.backoff(1, f64::NAN), Duration::from_millis(200));
        assert_eq!(config.backoff(1, 7.0), Duration::from_millis(240));
        assert!(config.backoff(64, 0.0) > Duration::from_secs(60));
    }

    #[test]
    fn stops_after_max_retries() {
        let config = RetryConfig::default();
        let error = status(500);
        let mut failed = attempt(&Method::GET, &error);

        for retry_count in 0..3 {
            failed.retry_count = retry_count;
            assert!(matches!(
                config.decide(&failed, 0.0),
                RetryDecision::Retry { .. }
            ));
        }
        failed.retry_count = 3;
        assert_eq!(config.decide(&failed, 0.0), RetryDecision::GiveUp);
    }

    #[test]
    fn respects_request_opt_out() {
        let error = network(NetworkErrorKind::Connect);
        let failed = FailedAttempt {
            retry_allowed: false,
            ..attempt(&Method::PUT, &error)
        };
        assert_eq!(
            RetryConfig::default().decide(&failed, 0.0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn deducts_elapsed_time_and_delay_from_timeout() {
        let error = status(502);
        let failed = FailedAttempt {
            timeout: Some(Duration::from_millis(2_500)),
            duration: Duration::from_millis(300),
            ..attempt(&Method::GET, &error)
        };

        assert_eq!(
            RetryConfig::default().decide(&failed, 0.0),
            RetryDecision::Retry {
                delay: Duration::from_millis(200),
                timeout: Some(Duration::from_millis(2_000)),
            }
        );

        assert_eq!(
            RetryConfig::default()
                .with_reset_timeout_on_retry(true)
                .decide(&failed, 0.0),
            RetryDecision::Retry {
                delay: Duration::from_millis(200),
                timeout: Some(Duration::from_millis(2_500)),
            }
        );
    }

    #[test]
    fn gives_up_when_timeout_budget_is_exhausted() {
        let error = status(502);
        let failed = FailedAttempt {
            timeout: Some(Duration::from_millis(500)),
            duration: Duration::from_millis(300),
            ..attempt(&Method::GET, &error)
        };
        assert_eq!(
            RetryConfig::default().decide(&failed, 0.0),
            RetryDecision::GiveUp
        );
    }

    /// Transport replaying scripted outcomes, recording every attempt.
    struct ScriptedTransport {
        outcomes: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
        attempts: RefCell<Vec<HttpRequest>>,
        clock: ManualClock,
        attempt_duration: Duration,
    }

    impl ScriptedTransport {
        fn new(
            outcomes: Vec<Result<HttpResponse, TransportError>>,
            clock: ManualClock,
        ) -> Self {
            ScriptedTransport {
                outcomes: RefCell::new(outcomes.into()),
                attempts: RefCell::new(Vec::new()),
                clock,
                attempt_duration: Duration::ZERO,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.attempts.borrow_mut().push(request.clone());
            self.clock.advance(self.attempt_duration);
            self.outcomes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(status(500)))
        }
    }

    fn ok() -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            body: "{}".to_owned(),
        })
    }

    fn get() -> HttpRequest {
        HttpRequest::new(Method::GET, "https://example.test/", serde_json::Value::Null)
    }

    #[test]
    fn permanently_failing_idempotent_request_is_attempted_four_times() {
        let clock = ManualClock::default();
        let transport = RetryingTransport::with_clock(
            ScriptedTransport::new(vec![], clock.clone()),
            RetryConfig::default(),
            clock.clone(),
        );

        let result = transport.send(&get());

        assert_eq!(result, Err(status(500)));
        assert_eq!(transport.inner().attempts.borrow().len(), 4);

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 3);
        for (retry, sleep) in sleeps.iter().enumerate() {
            let base = Duration::from_millis(100 * 2u64.pow(retry as u32 + 1));
            assert!(*sleep >= base && *sleep <= base.mul_f64(1.2), "{sleep:?}");
        }
    }

    #[test]
    fn recovers_after_transient_failures() {
        let clock = ManualClock::default();
        let transport = RetryingTransport::with_clock(
            ScriptedTransport::new(
                vec![Err(network(NetworkErrorKind::Connect)), Err(status(503)), ok()],
                clock.clone(),
            ),
            RetryConfig::default(),
            clock.clone(),
        );

        assert_eq!(transport.send(&get()), ok());
        assert_eq!(transport.inner().attempts.borrow().len(), 3);
    }

    #[test]
    fn does_not_retry_post_on_server_error() {
        let clock = ManualClock::default();
        let transport = RetryingTransport::with_clock(
            ScriptedTransport::new(vec![Err(status(500)), ok()], clock.clone()),
            RetryConfig::default(),
            clock.clone(),
        );
        let request =
            HttpRequest::new(Method::POST, "https://example.test/", serde_json::Value::Null);

        assert_eq!(transport.send(&request), Err(status(500)));
        assert_eq!(transport.inner().attempts.borrow().len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn shrinks_timeout_across_attempts_until_exhausted() {
        let clock = ManualClock::default();
        let mut scripted = ScriptedTransport::new(vec![], clock.clone());
        scripted.attempt_duration = Duration::from_millis(400);
        let transport = RetryingTransport::with_clock(
            scripted,
            RetryConfig {
                max_jitter: 0.0,
                ..RetryConfig::default()
            },
            clock.clone(),
        );
        let request = HttpRequest {
            timeout: Some(Duration::from_millis(2_500)),
            ..get()
        };

        assert!(transport.send(&request).is_err());

        let timeouts: Vec<Option<Duration>> = transport
            .inner()
            .attempts
            .borrow()
            .iter()
            .map(|attempt| attempt.timeout)
            .collect();
        // 2500 - 400 - 200 = 1900; 1900 - 400 - 400 = 1100; 1100 - 400 - 800 < 0
        assert_eq!(
            timeouts,
            vec![
                Some(Duration::from_millis(2_500)),
                Some(Duration::from_millis(1_900)),
                Some(Duration::from_millis(1_100)),
            ]
        );
    }
}
