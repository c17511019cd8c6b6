//! Acknowledgment Tracking and Retransmission
//!
//! Pure bookkeeping for the lock-step exchange. The trackers never touch a
//! socket; the session feeds them what arrived (or that nothing arrived) and
//! acts on the verdict.
//!
//! Block numbers are 16-bit and wrap, so "older" is decided with serial
//! number arithmetic: a number up to half the space behind the pending block
//! is stale, anything else that doesn't match is unexpected.

use std::time::Duration;

const TIMEOUT_SECS: u64 = 5;
const MAX_RETRIES: u32 = 5;

/// Half of the 16-bit block number space.
const HALF_WINDOW: u16 = 0x8000;

/// Per-attempt timeout and retry limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
        }
    }
}

/// What to do with an ACK received on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckVerdict {
    /// The pending block was acknowledged.
    Advance,
    /// An ACK for an earlier block (delayed or duplicated). Keep waiting.
    Stale,
    /// An ACK for a block that was never sent. Keep waiting.
    Unexpected,
}

/// What to do when a wait on the read path times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutVerdict {
    Retransmit,
    GiveUp,
}

/// Tracks the single outstanding DATA block of a read transfer.
#[derive(Debug, Clone)]
pub struct AckTracker {
    pending: u16,
    retransmissions: u32,
    max_retries: u32,
}

impl AckTracker {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            pending: 0,
            retransmissions: 0,
            max_retries: policy.max_retries,
        }
    }

    /// Record that `block` was just sent for the first time.
    pub fn sent(&mut self, block: u16) {
        self.pending = block;
        self.retransmissions = 0;
    }

    pub fn pending(&self) -> u16 {
        self.pending
    }

    /// Retransmissions made for the pending block so far.
    pub fn retransmissions(&self) -> u32 {
        self.retransmissions
    }

    /// # Examples
    /// ```
    /// use tftp::{AckTracker, AckVerdict, RetryPolicy};
    ///
    /// let mut tracker = AckTracker::new(&RetryPolicy::default());
    /// tracker.sent(3);
    /// assert_eq!(tracker.on_ack(2), AckVerdict::Stale);
    /// assert_eq!(tracker.on_ack(9), AckVerdict::Unexpected);
    /// assert_eq!(tracker.on_ack(3), AckVerdict::Advance);
    /// ```
    pub fn on_ack(&mut self, block: u16) -> AckVerdict {
        let behind = self.pending.wrapping_sub(block);
        if behind == 0 {
            self.retransmissions = 0;
            AckVerdict::Advance
        } else if behind < HALF_WINDOW {
            AckVerdict::Stale
        } else {
            AckVerdict::Unexpected
        }
    }

    pub fn on_timeout(&mut self) -> TimeoutVerdict {
        if self.retransmissions < self.max_retries {
            self.retransmissions += 1;
            TimeoutVerdict::Retransmit
        } else {
            TimeoutVerdict::GiveUp
        }
    }
}

/// What to do with a DATA packet received on the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVerdict {
    /// The expected block: persist it, then ACK it.
    Accept,
    /// A retransmission of the last accepted block: re-send this ACK, don't persist.
    Duplicate(u16),
    /// Anything else: re-send the last valid ACK, don't persist.
    Unexpected(u16),
}

/// What to do when a wait on the write path times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    KeepWaiting,
    GiveUp,
}

/// Tracks the next expected DATA block of a write transfer.
#[derive(Debug, Clone)]
pub struct DataTracker {
    expected: u16,
    idle_windows: u32,
    max_retries: u32,
}

impl DataTracker {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            expected: 1,
            idle_windows: 0,
            max_retries: policy.max_retries,
        }
    }

    pub fn expected(&self) -> u16 {
        self.expected
    }

    /// Block number of the most recent ACK; 0 is the ACK answering the WRQ.
    pub fn last_ack(&self) -> u16 {
        self.expected.wrapping_sub(1)
    }

    /// # Examples
    /// ```
    /// use tftp::{DataTracker, DataVerdict, RetryPolicy};
    ///
    /// let mut tracker = DataTracker::new(&RetryPolicy::default());
    /// assert_eq!(tracker.on_data(1), DataVerdict::Accept);
    /// tracker.accepted();
    /// assert_eq!(tracker.on_data(1), DataVerdict::Duplicate(1));
    /// assert_eq!(tracker.on_data(5), DataVerdict::Unexpected(1));
    /// ```
    pub fn on_data(&mut self, block: u16) -> DataVerdict {
        if block == self.expected {
            self.idle_windows = 0;
            DataVerdict::Accept
        } else if block == self.last_ack() {
            self.idle_windows = 0;
            DataVerdict::Duplicate(block)
        } else {
            DataVerdict::Unexpected(self.last_ack())
        }
    }

    /// The expected block was persisted and acknowledged.
    pub fn accepted(&mut self) {
        self.expected = self.expected.wrapping_add(1);
        self.idle_windows = 0;
    }

    pub fn on_timeout(&mut self) -> IdleVerdict {
        self.idle_windows += 1;
        if self.idle_windows >= self.max_retries {
            IdleVerdict::GiveUp
        } else {
            IdleVerdict::KeepWaiting
        }
    }

    pub fn idle_windows(&self) -> u32 {
        self.idle_windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(10),
            max_retries,
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(TIMEOUT_SECS));
        assert_eq!(policy.max_retries, 5);
    }

    #[test]
    fn test_ack_advance_resets_attempts() {
        let mut tracker = AckTracker::new(&policy(3));
        tracker.sent(1);
        assert_eq!(tracker.on_timeout(), TimeoutVerdict::Retransmit);
        assert_eq!(tracker.retransmissions(), 1);

        assert_eq!(tracker.on_ack(1), AckVerdict::Advance);
        assert_eq!(tracker.retransmissions(), 0);

        tracker.sent(2);
        assert_eq!(tracker.pending(), 2);
        assert_eq!(tracker.retransmissions(), 0);
    }

    #[test]
    fn test_stale_and_unexpected_acks_leave_state_alone() {
        let mut tracker = AckTracker::new(&policy(3));
        tracker.sent(10);
        tracker.on_timeout();

        assert_eq!(tracker.on_ack(9), AckVerdict::Stale);
        assert_eq!(tracker.on_ack(0), AckVerdict::Stale);
        assert_eq!(tracker.on_ack(11), AckVerdict::Unexpected);
        assert_eq!(tracker.on_ack(20000), AckVerdict::Unexpected);
        // 25546 blocks behind in wrapping terms, inside the half window
        assert_eq!(tracker.on_ack(40000), AckVerdict::Stale);

        assert_eq!(tracker.pending(), 10);
        assert_eq!(tracker.retransmissions(), 1);
    }

    #[test]
    fn test_stale_detection_across_wraparound() {
        let mut tracker = AckTracker::new(&policy(3));
        tracker.sent(2);
        assert_eq!(tracker.on_ack(u16::MAX), AckVerdict::Stale);
        assert_eq!(tracker.on_ack(0), AckVerdict::Stale);
        assert_eq!(tracker.on_ack(3), AckVerdict::Unexpected);
        assert_eq!(tracker.on_ack(2), AckVerdict::Advance);
    }

    #[test]
    fn test_timeout_gives_up_after_max_retries() {
        let mut tracker = AckTracker::new(&policy(2));
        tracker.sent(1);
        assert_eq!(tracker.on_timeout(), TimeoutVerdict::Retransmit);
        assert_eq!(tracker.on_timeout(), TimeoutVerdict::Retransmit);
        assert_eq!(tracker.on_timeout(), TimeoutVerdict::GiveUp);
        assert_eq!(tracker.retransmissions(), 2);
    }

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let mut tracker = AckTracker::new(&policy(0));
        tracker.sent(1);
        assert_eq!(tracker.on_timeout(), TimeoutVerdict::GiveUp);
    }

    #[test]
    fn test_data_tracker_sequence() {
        let mut tracker = DataTracker::new(&policy(3));
        assert_eq!(tracker.expected(), 1);
        assert_eq!(tracker.last_ack(), 0);

        assert_eq!(tracker.on_data(2), DataVerdict::Unexpected(0));
        assert_eq!(tracker.on_data(1), DataVerdict::Accept);
        tracker.accepted();

        assert_eq!(tracker.on_data(1), DataVerdict::Duplicate(1));
        assert_eq!(tracker.on_data(3), DataVerdict::Unexpected(1));
        assert_eq!(tracker.on_data(2), DataVerdict::Accept);
        tracker.accepted();
        assert_eq!(tracker.last_ack(), 2);
    }

    #[test]
    fn test_data_tracker_wraps() {
        let mut tracker = DataTracker::new(&policy(3));
        tracker.expected = u16::MAX;
        assert_eq!(tracker.on_data(u16::MAX), DataVerdict::Accept);
        tracker.accepted();
        assert_eq!(tracker.expected(), 0);
        assert_eq!(tracker.on_data(u16::MAX), DataVerdict::Duplicate(u16::MAX));
    }

    #[test]
    fn test_idle_windows() {
        let mut tracker = DataTracker::new(&policy(3));
        assert_eq!(tracker.on_timeout(), IdleVerdict::KeepWaiting);
        assert_eq!(tracker.on_timeout(), IdleVerdict::KeepWaiting);

        // A duplicate shows the client is still there.
        tracker.on_data(0);
        assert_eq!(tracker.idle_windows(), 0);

        assert_eq!(tracker.on_timeout(), IdleVerdict::KeepWaiting);
        assert_eq!(tracker.on_timeout(), IdleVerdict::KeepWaiting);
        assert_eq!(tracker.on_timeout(), IdleVerdict::GiveUp);
    }
}
