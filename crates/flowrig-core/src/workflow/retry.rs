//! Retry controller: exponential backoff with jitter and cancellable waits.
//!
//! A step's `retry` block overrides the global [`RetryDefaults`] field by
//! field. Errors are classified by case-insensitive substring match against
//! the retryable list; anything else fails on the spot.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use flowrig_types::config::RetryDefaults;
use flowrig_types::workflow::{DelaySpec, RetrySpec};
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Jitter spread applied around the base delay.
const JITTER_FRACTION: f64 = 0.25;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Resolved retry settings for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_errors: Vec<String>,
}

impl RetryPolicy {
    pub fn from_defaults(defaults: &RetryDefaults) -> Self {
        Self {
            max_attempts: defaults.max_attempts.max(1),
            initial_delay: Duration::from_millis(defaults.initial_delay_ms),
            max_delay: Duration::from_millis(defaults.max_delay_ms.max(defaults.initial_delay_ms)),
            multiplier: defaults.multiplier,
            jitter: defaults.jitter,
            retryable_errors: defaults.retryable_errors.clone(),
        }
    }

    /// Overlay a step's retry block on the global defaults.
    ///
    /// A step without a retry block runs exactly once.
    pub fn resolve(spec: Option<&RetrySpec>, defaults: &RetryDefaults) -> Result<Self, String> {
        let mut policy = Self::from_defaults(defaults);
        let Some(spec) = spec else {
            policy.max_attempts = 1;
            return Ok(policy);
        };

        if let Some(n) = spec.max_attempts {
            policy.max_attempts = n.max(1);
        }
        if let Some(delay) = &spec.delay {
            policy.initial_delay = parse_delay(delay)?;
        }
        if let Some(delay) = &spec.max_delay {
            policy.max_delay = parse_delay(delay)?;
        }
        if let Some(m) = spec.multiplier {
            if !m.is_finite() || m < 1.0 {
                return Err(format!("retry multiplier must be >= 1, got {m}"));
            }
            policy.multiplier = m;
        }
        if let Some(j) = spec.jitter {
            policy.jitter = j;
        }
        if let Some(errors) = &spec.retryable_errors {
            policy.retryable_errors = errors.clone();
        }
        if policy.max_delay < policy.initial_delay {
            policy.max_delay = policy.initial_delay;
        }
        Ok(policy)
    }

    /// Whether `message` matches any retryable pattern.
    pub fn is_retryable(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|p| !p.is_empty() && message.contains(&p.to_lowercase()))
    }

    /// Un-jittered wait after failed attempt `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Wait after failed attempt `attempt`, with jitter when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
        base.mul_f64(factor).clamp(self.initial_delay, self.max_delay)
    }
}

/// Parse `2`, `0.5`, `"500ms"`, `"2s"`, `"1m"`, or `"3"` into a duration.
pub fn parse_delay(spec: &DelaySpec) -> Result<Duration, String> {
    let secs = match spec {
        DelaySpec::Seconds(s) => *s,
        DelaySpec::Text(text) => {
            parse_secs(text).ok_or_else(|| format!("invalid retry delay '{}'", text.trim()))?
        }
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("retry delay must be non-negative, got {secs}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| format!("retry delay {secs}s is out of range"))
}

/// Seconds in `"500ms"`, `"2s"`, `"1m"`, `"1h"` or a bare number.
pub(crate) fn parse_secs(text: &str) -> Option<f64> {
    let text = text.trim();
    let (num, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = text.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (text, 1.0)
    };
    num.trim().parse::<f64>().ok().map(|v| v * scale)
}

// ---------------------------------------------------------------------------
// RetryError
// ---------------------------------------------------------------------------

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display + fmt::Debug> {
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// The error did not match any retryable pattern.
    #[error("{error}")]
    NonRetryable { attempts: u32, error: E },

    #[error("operation failed after {attempts} attempts, last error: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E: fmt::Display + fmt::Debug> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Cancelled { attempts }
            | Self::NonRetryable { attempts, .. }
            | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `attempt` until it succeeds, fails non-retryably, or runs out of tries.
///
/// `attempt` receives the 1-based attempt number. `on_retry` is told about
/// each failed attempt that will be retried, with the wait before the next.
/// On success the value and the number of attempts used are returned.
/// Cancellation aborts both the delay between attempts and an attempt in
/// flight.
pub async fn execute_with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
    mut on_retry: R,
) -> Result<(T, u32), RetryError<E>>
where
    E: fmt::Display + fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, Duration, &E),
{
    let max = policy.max_attempts.max(1);
    let mut n = 1;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: n }),
            outcome = attempt(n) => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok((value, n)),
            Err(error) => error,
        };

        if !policy.is_retryable(&error.to_string()) {
            return Err(RetryError::NonRetryable { attempts: n, error });
        }
        if n >= max {
            return Err(RetryError::Exhausted { attempts: n, last: error });
        }

        let delay = policy.delay_for(n);
        tracing::debug!(attempt = n, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
        on_retry(n, delay, &error);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: n }),
            _ = tokio::time::sleep(delay) => {}
        }
        n += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
            retryable_errors: vec!["timeout".to_string(), "connection".to_string()],
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let mut p = policy(10);
        assert_eq!(p.base_delay(1), Duration::from_secs(1));
        assert_eq!(p.base_delay(2), Duration::from_secs(2));
        assert_eq!(p.base_delay(3), Duration::from_secs(4));
        p.max_delay = Duration::from_secs(5);
        assert_eq!(p.base_delay(4), Duration::from_secs(5));
        assert_eq!(p.base_delay(200), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut p = policy(10);
        p.jitter = true;
        p.max_delay = Duration::from_secs(10);
        for attempt in 1..8 {
            let base = p.base_delay(attempt);
            let d = p.delay_for(attempt);
            assert!(d >= p.initial_delay && d <= p.max_delay);
            assert!(d >= base.mul_f64(0.75).max(p.initial_delay));
            assert!(d <= base.mul_f64(1.25).min(p.max_delay));
        }
    }

    #[test]
    fn test_is_retryable_case_insensitive() {
        let p = policy(3);
        assert!(p.is_retryable("Connection refused"));
        assert!(p.is_retryable("request TIMEOUT"));
        assert!(!p.is_retryable("permission denied"));
    }

    #[test]
    fn test_resolve_overrides_defaults() {
        let defaults = RetryDefaults::default();
        let none = RetryPolicy::resolve(None, &defaults).unwrap();
        assert_eq!(none.max_attempts, 1);

        let spec = RetrySpec {
            max_attempts: Some(5),
            delay: Some(DelaySpec::Text("500ms".to_string())),
            max_delay: Some(DelaySpec::Seconds(4.0)),
            multiplier: None,
            jitter: Some(false),
            retryable_errors: None,
        };
        let p = RetryPolicy::resolve(Some(&spec), &defaults).unwrap();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.initial_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(4));
        assert_eq!(p.multiplier, 2.0);
        assert!(!p.jitter);
        assert_eq!(p.retryable_errors, defaults.retryable_errors);
    }

    #[test]
    fn test_resolve_zero_attempts_runs_once() {
        let spec = RetrySpec {
            max_attempts: Some(0),
            ..Default::default()
        };
        let p = RetryPolicy::resolve(Some(&spec), &RetryDefaults::default()).unwrap();
        assert_eq!(p.max_attempts, 1);
    }

    #[test]
    fn test_parse_delay_forms() {
        assert_eq!(parse_delay(&DelaySpec::Seconds(2.0)).unwrap(), Duration::from_secs(2));
        assert_eq!(parse_delay(&DelaySpec::Text("1m".into())).unwrap(), Duration::from_secs(60));
        assert_eq!(parse_delay(&DelaySpec::Text("3".into())).unwrap(), Duration::from_secs(3));
        assert!(parse_delay(&DelaySpec::Text("soon".into())).is_err());
        assert!(parse_delay(&DelaySpec::Seconds(-1.0)).is_err());
    }

    #[test]
    fn test_out_of_range_delay_is_configuration_error() {
        let err = parse_delay(&DelaySpec::Text("1e30s".into())).unwrap_err();
        assert!(err.contains("out of range"), "got: {err}");
        assert!(parse_delay(&DelaySpec::Seconds(1e30)).is_err());

        let spec = RetrySpec {
            delay: Some(DelaySpec::Text("1e30s".to_string())),
            ..Default::default()
        };
        assert!(RetryPolicy::resolve(Some(&spec), &RetryDefaults::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_between_attempts() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();
        let s = Arc::clone(&starts);
        let result: Result<((), u32), _> = execute_with_retry(
            &policy(3),
            &CancellationToken::new(),
            move |_| {
                s.lock().unwrap().push(origin.elapsed());
                async { Err::<(), _>("connection reset".to_string()) }
            },
            |_, _, _| {},
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[1] - starts[0], Duration::from_secs(1));
        assert_eq!(starts[2] - starts[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let result: Result<((), u32), _> = execute_with_retry(
            &policy(5),
            &CancellationToken::new(),
            move |_| {
                *c.lock().unwrap() += 1;
                async { Err::<(), _>("invalid input".to_string()) }
            },
            |_, _, _| {},
        )
        .await;
        assert!(matches!(result, Err(RetryError::NonRetryable { attempts: 1, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let mut retries = Vec::new();
        let (value, attempts) = execute_with_retry(
            &policy(3),
            &CancellationToken::new(),
            |n| async move {
                if n < 2 {
                    Err("timeout talking to host".to_string())
                } else {
                    Ok(n * 10)
                }
            },
            |n, delay, err: &String| retries.push((n, delay, err.clone())),
        )
        .await
        .unwrap();
        assert_eq!(value, 20);
        assert_eq!(attempts, 2);
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].0, 1);
        assert_eq!(retries[0].1, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_wait() {
        let cancel = CancellationToken::new();
        let mut p = policy(3);
        p.initial_delay = Duration::from_secs(60);
        p.max_delay = Duration::from_secs(60);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<((), u32), _> = execute_with_retry(
            &p,
            &cancel,
            |_| async { Err::<(), _>("timeout".to_string()) },
            |_, _, _| {},
        )
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
