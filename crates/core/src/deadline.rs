//! Caller-supplied deadlines for blocking operations.

use std::time::{Duration, Instant};

/// Point in time after which a blocking operation must give up.
///
/// Ledger writes and order Confirm/Cancel retry their compare-and-set until the
/// deadline passes, then surface `Timeout` instead of queueing indefinitely.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Never expires.
    pub fn none() -> Self {
        Self(None)
    }

    /// Expires `timeout` from now.
    pub fn within(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left before expiry; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Clamp a sleep so it never overshoots the deadline.
    pub fn clamp(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
