//! Configuration for the commit coordinator.

use rand::Rng;
use std::time::Duration;

/// Configuration for completing segments against a controller.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Identity of this server in every request.
    pub instance_id: String,
    /// Controller address for `segmentConsumed` and non-split commits.
    pub controller_url: String,
    /// Backoff for HOLD, NOT_LEADER, FAILED and transport failures.
    pub retry: RetryConfig,
    /// Per-request timeout handed to the HTTP client.
    pub request_timeout: Duration,
    /// How many times in a row the controller may answer CATCH_UP.
    pub max_catch_up_rounds: u32,
}

impl CompletionConfig {
    /// Creates a configuration for `instance_id` talking to `controller_url`.
    pub fn new(instance_id: impl Into<String>, controller_url: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            controller_url: controller_url.into(),
            retry: RetryConfig::new(20)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(5)),
            request_timeout: Duration::from_secs(30),
            max_catch_up_rounds: 5,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the catch-up limit.
    pub fn with_max_catch_up_rounds(mut self, rounds: u32) -> Self {
        self.max_catch_up_rounds = rounds;
        self
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self::new("", "http://localhost:9000")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on a single delay, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
