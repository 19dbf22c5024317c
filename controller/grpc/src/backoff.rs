use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,

    /// A stream that lasted longer than this is considered to have been
    /// healthy, and its failure resets the delay to `base`.
    pub stable: Duration,
}

/// Reconnect delay for the monitor stream.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

// === impl BackoffConfig ===

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            stable: Duration::from_secs(10),
        }
    }
}

// === impl Backoff ===

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.base,
            config,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Records how long the last stream lived and returns the delay to wait
    /// before reconnecting.
    pub fn next_delay(&mut self, streamed_for: Duration) -> Duration {
        self.current = if streamed_for > self.config.stable {
            self.config.base
        } else {
            self.current.saturating_mul(2).min(self.config.max)
        };
        self.current
    }
}
