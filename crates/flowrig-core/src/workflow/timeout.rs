//! Timeout controller: per-step deadline with a configured default and cap.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use flowrig_types::config::TimeoutConfig;
use serde_json::Value;
use thiserror::Error;

use super::retry::parse_secs;

/// Default and maximum step timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub default: Duration,
    pub max: Duration,
}

impl TimeoutSettings {
    pub fn new(default: Duration, max: Duration) -> Self {
        Self { default, max }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for TimeoutSettings {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            default: Duration::from_secs(config.default_secs),
            max: Duration::from_secs(config.max_secs.max(config.default_secs)),
        }
    }
}

#[derive(Debug, Error)]
pub enum TimeoutError<E: fmt::Display + fmt::Debug> {
    #[error("invalid timeout: {0}")]
    Configuration(String),

    #[error("operation timed out after {}", humanize(*.0))]
    Elapsed(Duration),

    #[error("{0}")]
    Failed(E),
}

/// Compute the deadline from a step's `timeout` value.
///
/// Numbers are seconds; strings may carry a unit (`"30s"`, `"2m"`). Absent
/// means the default. Values above the maximum are clamped.
pub fn effective_timeout(
    timeout: Option<&Value>,
    settings: &TimeoutSettings,
) -> Result<Duration, String> {
    let Some(value) = timeout else {
        return Ok(settings.default);
    };
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_secs(s),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| format!("timeout must be a number, got {value}"))?;

    if secs <= 0.0 {
        return Err(format!("timeout must be positive, got {secs}"));
    }
    if secs > settings.max.as_secs_f64() {
        tracing::warn!(
            requested_secs = secs,
            max_secs = settings.max.as_secs(),
            "step timeout exceeds maximum, clamping"
        );
        return Ok(settings.max);
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Run `fut` under the effective deadline.
///
/// On expiry the future is dropped; whatever it would have produced is lost.
pub async fn execute_with_timeout<T, E, Fut>(
    timeout: Option<&Value>,
    settings: &TimeoutSettings,
    fut: Fut,
) -> Result<T, TimeoutError<E>>
where
    E: fmt::Display + fmt::Debug,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = effective_timeout(timeout, settings).map_err(TimeoutError::Configuration)?;
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(TimeoutError::Failed),
        Err(_) => Err(TimeoutError::Elapsed(deadline)),
    }
}

fn humanize(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
