//! Retry policy for query loads.

use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::ApiError;

/// What to do after a failed load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then run the loader again.
    Backoff(Duration),
    /// Make sure the token is valid, then retry once.
    RefreshAndRetry,
    /// Surface the error.
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_retries: config.retry_attempts,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Policy that never retries network failures. 401 still gets its
    /// single refresh-and-retry.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide after a failure.
    ///
    /// `retries` is how many backoff retries already ran and
    /// `auth_retried` whether the 401 retry was already spent.
    pub fn decide(&self, error: &ApiError, retries: u32, auth_retried: bool) -> RetryDecision {
        if error.is_unauthorized() {
            return if auth_retried {
                RetryDecision::GiveUp
            } else {
                RetryDecision::RefreshAndRetry
            };
        }
        if error.is_retryable() && retries < self.max_retries {
            RetryDecision::Backoff(self.delay_for(retries))
        } else {
            RetryDecision::GiveUp
        }
    }
}
