use derive_more::Constructor;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);
const DEFAULT_CONSTANT_DELAY: Duration = Duration::from_secs(1);

/// Determines the time for the next reconnection attempt when trying to reconnect to a node.
pub trait ReconnectionSchedule {
    /// Returns next reconnect delay or `None` if no further attempt should be made.
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Creates reconnection schedules when trying to re-establish connections.
#[cfg_attr(test, automock)]
pub trait ReconnectionPolicy: Send + Sync {
    /// Creates new schedule when a connection needs to be re-established. Every schedule starts
    /// from its first delay.
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync>;
}

/// Schedules reconnection at constant interval.
#[derive(Copy, Clone, Constructor, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl Default for ConstantReconnectionPolicy {
    fn default() -> Self {
        ConstantReconnectionPolicy::new(DEFAULT_CONSTANT_DELAY)
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ConstantReconnectionSchedule::new(self.delay))
    }
}

#[derive(Constructor)]
struct ConstantReconnectionSchedule {
    delay: Duration,
}

impl ReconnectionSchedule for ConstantReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        Some(self.delay)
    }
}

/// Never schedules reconnections.
#[derive(Default, Copy, Clone, Debug, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct NeverReconnectionPolicy;

impl ReconnectionPolicy for NeverReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(NeverReconnectionSchedule)
    }
}

struct NeverReconnectionSchedule;

impl ReconnectionSchedule for NeverReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        None
    }
}

/// A reconnection policy that waits exponentially longer between each reconnection attempt, but
/// keeps a constant delay once a maximum delay is reached. The n-th delay (counting from 0) is
/// `min(base_delay * 2^n, max_delay)`. Schedules never end.
#[derive(Copy, Clone, Constructor, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialReconnectionPolicy {
    #[inline]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[inline]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        ExponentialReconnectionPolicy::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ExponentialReconnectionSchedule::new(
            self.base_delay,
            self.max_delay,
        ))
    }
}

/// Schedule created by [`ExponentialReconnectionPolicy`]. Can also be used as an infinite
/// iterator of delays.
#[derive(Clone, Debug)]
pub struct ExponentialReconnectionSchedule {
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl ExponentialReconnectionSchedule {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ExponentialReconnectionSchedule {
            base_delay,
            max_delay,
            attempt: 0,
        }
    }
}

impl ReconnectionSchedule for ExponentialReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        let delay = self
            .base_delay
            .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.max_delay);

        self.attempt = self.attempt.saturating_add(1);

        Some(delay)
    }
}

impl Iterator for ExponentialReconnectionSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_delay()
    }
}
