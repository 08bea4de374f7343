//! Bounded restart policy for discovery and the listener.

use std::time::Duration;

/// Fixed-delay restart with a retry budget.
///
/// After `max_retries` restarts the failure is escalated to the operator
/// instead of being retried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before each restart
    pub delay: Duration,
    /// Restarts allowed before escalating
    pub max_retries: u32,
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (counting from 1), or `None`
    /// once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt >= 1 && attempt <= self.max_retries).then_some(self.delay)
    }

    /// A policy that never waits, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            delay: Duration::ZERO,
            max_retries,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_retries: 1,
        }
    }
}
