// ABOUTME: Retry policies computing backoff delay and retry eligibility
//
// Policies are stateless so one instance can be shared by every session in a
// fleet. The attempt counter lives on the session, not on the policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, FleetError, FleetResult};

/// Strategy deciding whether and when a failed connect is retried
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Delay before retry number `attempt` (1-based); attempt 0 waits nothing
    fn retry_delay(&self, attempt: u32) -> Duration;

    /// Maximum number of retries after the initial attempt
    fn max_retry_attempts(&self) -> u32;

    /// Whether a failure of this kind may be retried at all
    fn should_retry(&self, kind: ErrorKind) -> bool {
        kind.is_retryable()
    }
}

/// Exponential backoff: `initial * multiplier^(n-1)`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Create an exponential backoff policy
    ///
    /// Rejects a multiplier below 1.0 (delays would shrink) and an initial
    /// delay above the cap.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> FleetResult<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(FleetError::InvalidConfiguration(format!(
                "backoff multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        if initial_delay > max_delay {
            return Err(FleetError::InvalidConfiguration(format!(
                "initial delay {initial_delay:?} exceeds max delay {max_delay:?}"
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        // Whole nanoseconds keep millisecond configs exact through the float math
        #[allow(clippy::cast_precision_loss)]
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= cap {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64).min(self.max_delay)
    }

    fn max_retry_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Constant delay between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    max_attempts: u32,
    delay: Duration,
}

impl FixedDelay {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    fn max_retry_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Never retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn retry_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn max_retry_attempts(&self) -> u32 {
        0
    }

    fn should_retry(&self, _kind: ErrorKind) -> bool {
        false
    }
}

/// Retry configuration as stored in fleet config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryConfig {
    Exponential {
        max_attempts: u32,
        #[serde(with = "crate::config::duration_millis")]
        initial_delay_ms: Duration,
        #[serde(with = "crate::config::duration_millis")]
        max_delay_ms: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
    Fixed {
        max_attempts: u32,
        #[serde(with = "crate::config::duration_millis")]
        delay_ms: Duration,
    },
    None,
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::Exponential {
            max_attempts: 3,
            initial_delay_ms: Duration::from_millis(2000),
            max_delay_ms: Duration::from_millis(8000),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Build the shared policy instance described by this config
    pub fn build(&self) -> FleetResult<Arc<dyn RetryPolicy>> {
        Ok(match self {
            Self::Exponential {
                max_attempts,
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => Arc::new(ExponentialBackoff::new(
                *max_attempts,
                *initial_delay_ms,
                *max_delay_ms,
                *multiplier,
            )?),
            Self::Fixed {
                max_attempts,
                delay_ms,
            } => Arc::new(FixedDelay::new(*max_attempts, *delay_ms)),
            Self::None => Arc::new(NoRetry),
        })
    }
}
