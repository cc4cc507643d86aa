//! Reconnect delays for push channels.

use std::time::Duration;

use rand::Rng;

/// Default first reconnect delay.
pub const DEFAULT_RECONNECT_MIN: Duration = Duration::from_secs(2);

/// Default ceiling for reconnect delays.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Default growth factor between attempts.
pub const DEFAULT_RECONNECT_MULTIPLIER: f64 = 2.0;

/// Default jitter fraction (±20%).
pub const DEFAULT_RECONNECT_JITTER: f64 = 0.2;

/// Smallest delay a policy will use between attempts.
pub const MIN_RECONNECT_FLOOR: Duration = Duration::from_millis(100);

/// Largest accepted growth factor.
pub const MAX_RECONNECT_MULTIPLIER: f64 = 16.0;

/// Exponential reconnect policy with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// First delay after a failure.
    pub min_delay: Duration,
    /// Delays never exceed this.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    multiplier: f64,
    /// Random spread as a fraction of the delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_RECONNECT_MIN,
            max_delay: DEFAULT_RECONNECT_MAX,
            multiplier: DEFAULT_RECONNECT_MULTIPLIER,
            jitter: DEFAULT_RECONNECT_JITTER,
        }
    }
}

impl ReconnectPolicy {
    /// Set the delay bounds. The minimum never drops below
    /// [`MIN_RECONNECT_FLOOR`].
    pub fn with_bounds(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay.max(MIN_RECONNECT_FLOOR);
        self.max_delay = max_delay.max(self.min_delay);
        self
    }

    /// Set the growth factor. Clamped to `[1, MAX_RECONNECT_MULTIPLIER]`;
    /// non-finite values fall back to the default.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.clamp(1.0, MAX_RECONNECT_MULTIPLIER)
        } else {
            DEFAULT_RECONNECT_MULTIPLIER
        };
        self
    }

    /// Growth factor per consecutive failure.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Set the jitter fraction. Clamped to `[0, 0.9]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 0.9)
        } else {
            0.0
        };
        self
    }

    /// Start a fresh backoff sequence.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            current: self.min_delay.max(MIN_RECONNECT_FLOOR),
            attempts: 0,
        }
    }
}

/// State of one backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// The next delay before jitter, then advance the sequence.
    pub fn next_base_delay(&mut self) -> Duration {
        let base = self.current;
        let grown = base.mul_f64(self.policy.multiplier);
        self.current = grown.min(self.policy.max_delay).max(MIN_RECONNECT_FLOOR);
        self.attempts = self.attempts.saturating_add(1);
        base
    }

    /// The next delay with jitter applied, then advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_base_delay();
        let jitter = self.policy.jitter;
        if jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(factor).min(self.policy.max_delay)
    }

    /// Back to the minimum delay, after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.policy.min_delay.max(MIN_RECONNECT_FLOOR);
        self.attempts = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
