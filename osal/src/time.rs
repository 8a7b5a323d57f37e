//! Time representation shared by every blocking primitive.

use abi::{NO_WAIT, WAIT_FOREVER};

/// In-runtime timestamp, measured in milliseconds against the backend's
/// monotonic clock. The epoch is backend-defined and only differences are
/// meaningful.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

impl Timestamp {
    pub fn checked_add_ms(self, ms: u32) -> Option<Timestamp> {
        self.0.checked_add(u64::from(ms)).map(Timestamp)
    }
}

/// A blocking call's wait budget, decoded from the raw millisecond value
/// callers pass at the API boundary (`abi::NO_WAIT` / `abi::WAIT_FOREVER` are
/// reserved sentinels; anything else is a literal millisecond count).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Timeout {
    /// Fail immediately on contention; never blocks.
    NoWait,
    /// Block with no deadline.
    Forever,
    /// Block for at most this many milliseconds.
    Millis(u32),
}

impl From<u32> for Timeout {
    fn from(ms: u32) -> Self {
        match ms {
            NO_WAIT => Timeout::NoWait,
            WAIT_FOREVER => Timeout::Forever,
            ms => Timeout::Millis(ms),
        }
    }
}

impl Timeout {
    /// Resolves this timeout against a starting instant into an absolute
    /// deadline. `None` means "no deadline" (either `Forever`, or the caller
    /// should have already short-circuited on `NoWait`).
    pub fn deadline_from(self, now: Timestamp) -> Option<Timestamp> {
        match self {
            Timeout::NoWait => Some(now),
            Timeout::Forever => None,
            Timeout::Millis(ms) => Some(now.checked_add_ms(ms).unwrap_or(Timestamp(u64::MAX))),
        }
    }

    pub fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sentinels() {
        assert_eq!(Timeout::from(NO_WAIT), Timeout::NoWait);
        assert_eq!(Timeout::from(WAIT_FOREVER), Timeout::Forever);
        assert_eq!(Timeout::from(5), Timeout::Millis(5));
    }

    #[test]
    fn forever_has_no_deadline() {
        assert_eq!(Timeout::Forever.deadline_from(Timestamp(0)), None);
    }

    #[test]
    fn millis_deadline_adds() {
        assert_eq!(
            Timeout::Millis(10).deadline_from(Timestamp(5)),
            Some(Timestamp(15))
        );
    }
}
