//! Retry policy with fixed, linear, or exponential backoff.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use qsmon_core::EngineConfig;
use serde::{Deserialize, Serialize};

pub use qsmon_core::RetryStrategy;

/// Called before each retry with the upcoming attempt number and a message.
pub type RetryCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    /// Three exponential retries starting at one second.
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// `max_retries` retries with no delay in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_retries,
        }
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the retry that follows `count` previous retries.
    pub fn delay_for(&self, count: u32) -> Duration {
        let delay = match self.strategy {
            RetryStrategy::Fixed => return self.base_delay,
            RetryStrategy::Linear => self.base_delay.as_secs_f64() * f64::from(count + 1),
            RetryStrategy::Exponential => {
                self.base_delay.as_secs_f64() * self.backoff_factor.powi(count as i32)
            }
        };
        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }
}

impl From<&EngineConfig> for RetryConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            strategy: config.retry_strategy,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            max_retries: config.max_retries,
        }
    }
}

/// Attempt counter driven by a [`RetryConfig`].
///
/// `current_retry_count` stays within `0..=max_retries` and is reset only
/// when a new [`execute_with_retry`](Self::execute_with_retry) loop starts.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_retry_count: u32,
    on_retry: Option<RetryCallback>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            current_retry_count: 0,
            on_retry: None,
        }
    }

    /// Register a callback invoked before every retry.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &str) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    pub fn should_retry(&self) -> bool {
        self.current_retry_count < self.config.max_retries
    }

    pub fn increment_retry(&mut self) {
        if self.should_retry() {
            self.current_retry_count += 1;
        }
    }

    pub fn reset(&mut self) {
        self.current_retry_count = 0;
    }

    /// Delay to apply before the next retry.
    pub fn retry_delay(&self) -> Duration {
        self.config.delay_for(self.current_retry_count)
    }

    /// Percentage of the retry budget used, 0-100.
    pub fn retry_progress(&self) -> u8 {
        if self.config.max_retries == 0 {
            return 100;
        }
        let pct = u64::from(self.current_retry_count) * 100 / u64::from(self.config.max_retries);
        pct.min(100) as u8
    }

    pub fn remaining_retries(&self) -> u32 {
        self.config.max_retries.saturating_sub(self.current_retry_count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_retry_count >= self.config.max_retries
    }

    /// Announce and sleep through the delay before the next retry, then
    /// count it. Does nothing once the budget is exhausted.
    pub async fn wait_for_next_retry(&mut self, name: &str) {
        if !self.should_retry() {
            return;
        }
        let delay = self.retry_delay();
        let attempt = self.current_retry_count + 1;
        let message = format!("Retry attempt {}/{}", attempt, self.config.max_retries);
        tracing::debug!(command = name, delay_ms = delay.as_millis() as u64, "{}", message);
        if let Some(callback) = &self.on_retry {
            callback(attempt, &message);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.increment_retry();
    }

    /// Run `operation` until it succeeds or the retry budget is spent.
    ///
    /// Every error is treated as retryable. Returns the first success or the
    /// last error.
    pub async fn execute_with_retry<T, E, F, Fut>(&mut self, name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_retry_if(name, operation, |_| true).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), but stops at
    /// the first error for which `retryable` returns `false`.
    pub async fn execute_with_retry_if<T, E, F, Fut, P>(
        &mut self,
        name: &str,
        mut operation: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        self.reset();
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !retryable(&e) || !self.should_retry() {
                        tracing::debug!(
                            command = name,
                            retries = self.current_retry_count,
                            error = %e,
                            "Giving up"
                        );
                        return Err(e);
                    }
                    tracing::debug!(command = name, error = %e, "Attempt failed");
                    self.wait_for_next_retry(name).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("current_retry_count", &self.current_retry_count)
            .finish()
    }
}
