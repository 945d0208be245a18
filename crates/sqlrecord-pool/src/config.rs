//! Pool configuration.

use sqlrecord_core::{Error, PoolErrorKind, Result};
use std::time::Duration;

/// Upper bound for every configured duration (one year).
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections the pool will open.
    pub size: usize,
    /// Maximum time to wait for a connection.
    pub checkout_timeout: Duration,
    /// How often the background reaper runs; `None` disables it.
    pub reaping_frequency: Option<Duration>,
    /// Idle connections unused for longer than this are dropped by
    /// [`Pool::flush`](crate::Pool::flush); `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
    /// Test connections before giving them out.
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            checkout_timeout: Duration::from_secs(5),
            reaping_frequency: Some(Duration::from_secs(60)),
            idle_timeout: Some(Duration::from_secs(300)),
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given size.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Run the reaper every `frequency`, or never with `None`.
    pub fn reaping_frequency(mut self, frequency: Option<Duration>) -> Self {
        self.reaping_frequency = frequency;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on checkout.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Reject an empty pool and durations above [`MAX_DURATION`].
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::pool(
                PoolErrorKind::Config,
                "pool size must be at least 1",
            ));
        }
        let durations = [
            ("checkout_timeout", Some(self.checkout_timeout)),
            ("reaping_frequency", self.reaping_frequency),
            ("idle_timeout", self.idle_timeout),
        ];
        for (name, value) in durations {
            if value.is_some_and(|d| d > MAX_DURATION) {
                return Err(Error::pool(
                    PoolErrorKind::Config,
                    format!("{name} must not exceed {} seconds", MAX_DURATION.as_secs()),
                ));
            }
        }
        Ok(())
    }
}
