//! Helper utilities for Tunnelrat
//!
//! This module provides common utility functions used throughout the application.

use std::io;
use std::time::Duration;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How long a public connection waits for a proxy connection
pub const DEFAULT_PROXY_WAIT_SECS: u64 = 10;

/// Retry schedule for a long-running daemon
///
/// A fixed number of quick attempts with a short delay, then one longer
/// delay before the next round. The schedule never terminates; callers
/// loop on [`RetrySchedule::next_delay`] until shutdown.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    /// Number of quick attempts per round
    pub quick_attempts: u32,
    /// Delay between quick attempts
    pub quick_delay: Duration,
    /// Delay after a full round of quick attempts failed
    pub long_delay: Duration,
    failures: u32,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        RetrySchedule {
            quick_attempts: 3,
            quick_delay: Duration::from_secs(1),
            long_delay: Duration::from_secs(30),
            failures: 0,
        }
    }
}

impl RetrySchedule {
    /// Create a schedule with the given quick/long delays
    pub fn new(quick_attempts: u32, quick_delay: Duration, long_delay: Duration) -> Self {
        RetrySchedule {
            quick_attempts,
            quick_delay,
            long_delay,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.failures += 1;
        if self.failures >= self.quick_attempts {
            self.failures = 0;
            self.long_delay
        } else {
            self.quick_delay
        }
    }

    /// Record a success, restarting the quick-attempt budget
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Classify an accept error as transient or fatal
///
/// Transient errors (file-descriptor exhaustion, connection-level resets
/// that surface on accept) are retried with backoff; anything else stops
/// the listener.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    // EMFILE / ENFILE surface as uncategorized io errors
    if matches!(err.raw_os_error(), Some(24) | Some(23)) {
        return true;
    }

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
