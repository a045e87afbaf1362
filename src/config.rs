//! Session configuration.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::ble::filter::{DeviceFilter, DEFAULT_ALLOW_LIST};
use crate::ble::uuids::GattTarget;
use crate::error::Result;

/// Default capacity of the scan and connection event channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Bounded retry with exponential backoff.
///
/// The default makes a single attempt, so nothing is retried unless a policy
/// is configured explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// A policy with `max_attempts` attempts, doubling the delay each time.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} attempt {} of {} failed: {} (retrying in {:?})",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Configuration for a [`BleSession`](crate::BleSession).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Name fragments a device must advertise to be listed.
    pub allow_list: Vec<String>,
    /// Service/characteristic pair outbound payloads are written to.
    pub target: GattTarget,
    /// Capacity of the event broadcast channels.
    pub event_capacity: usize,
    /// Retry policy for the connect step.
    pub connect_retry: RetryPolicy,
    /// Retry policy for characteristic writes.
    pub write_retry: RetryPolicy,
    /// Clear the connection reference even when the platform disconnect fails.
    pub force_clear_on_disconnect_error: bool,
}

impl SessionConfig {
    /// Replace the allow-list.
    pub fn with_allow_list<I, S>(mut self, allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list = allow_list.into_iter().map(Into::into).collect();
        self
    }

    /// Write to a different service/characteristic pair.
    pub fn with_target(mut self, target: GattTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the connect retry policy.
    pub fn with_connect_retry(mut self, retry: RetryPolicy) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Set the write retry policy.
    pub fn with_write_retry(mut self, retry: RetryPolicy) -> Self {
        self.write_retry = retry;
        self
    }

    /// Clear the connection reference when disconnect fails.
    pub fn with_force_clear_on_disconnect_error(mut self, force: bool) -> Self {
        self.force_clear_on_disconnect_error = force;
        self
    }

    /// Build the device filter for this configuration.
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.allow_list.iter().cloned())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
            target: GattTarget::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            connect_retry: RetryPolicy::none(),
            write_retry: RetryPolicy::none(),
            force_clear_on_disconnect_error: false,
        }
    }
}
