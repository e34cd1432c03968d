//! Connection retry policy
//!
//! A plain value consulted after every failed connect. It never performs
//! the refresh itself; the connection manager acts on the decision.

use super::MailError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Refresh credentials, wait `backoff`, then connect again
    RefreshAndRetry { backoff: Duration },
    GiveUp,
}

/// Decides whether a failed connect deserves another attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    classifier: fn(&MailError) -> bool,
}

impl Default for RetryPolicy {
    /// One retry, auth failures only, no backoff
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::ZERO,
            classifier: MailError::is_auth_failure,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration, classifier: fn(&MailError) -> bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            classifier,
        }
    }

    /// `attempt` is the 1-based number of the attempt that just failed
    pub fn decide(&self, error: &MailError, attempt: u32, can_refresh: bool) -> RetryDecision {
        if can_refresh && attempt < self.max_attempts && (self.classifier)(error) {
            RetryDecision::RefreshAndRetry {
                backoff: self.backoff,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
