//! Configuration for the sync engine.

use mutsync_outbox::OutboxStore;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry configuration for publishes.
    pub retry: RetryConfig,
    /// Upper bound on publishes in flight across all identities.
    pub max_concurrent_publishes: usize,
    /// Time limit for a single remote publish call.
    pub publish_timeout: Duration,
    /// Capacity of the [`SyncEvent`](crate::SyncEvent) channel.
    pub event_channel_capacity: usize,
    /// What happens to an entry once its retries are used up.
    pub exhausted_policy: ExhaustedPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrent_publishes: 8,
            publish_timeout: Duration::from_secs(30),
            event_channel_capacity: 256,
            exhausted_policy: ExhaustedPolicy::KeepQueued,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cross-identity publish limit.
    pub fn with_max_concurrent_publishes(mut self, limit: usize) -> Self {
        self.max_concurrent_publishes = limit.max(1);
        self
    }

    /// Sets the publish timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Sets the policy for entries whose retries are exhausted.
    pub fn with_exhausted_policy(mut self, policy: ExhaustedPolicy) -> Self {
        self.exhausted_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of publish attempts per entry, the first included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
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
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-indexed).
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at
    /// `max_delay`, plus up to 25% jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

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

/// What the engine does with an entry after its last failed attempt.
#[derive(Clone, Default)]
pub enum ExhaustedPolicy {
    /// Leave the entry in the outbox. It is offered again on the next start.
    #[default]
    KeepQueued,
    /// Copy the entry into a dead-letter store, then remove it from the outbox.
    DeadLetter(Arc<dyn OutboxStore>),
}

impl fmt::Debug for ExhaustedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepQueued => f.write_str("KeepQueued"),
            Self::DeadLetter(_) => f.write_str("DeadLetter(..)"),
        }
    }
}
