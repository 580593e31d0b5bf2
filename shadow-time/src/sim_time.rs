use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// A 64-bit count of simulated nanoseconds since epoch 0.
///
/// `SimTime` never reads the wall clock; it only ever advances by explicit
/// addition of durations computed elsewhere (link latency, CPU-delay charges,
/// timer intervals). Zero is the start of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimTime(u64);

impl SimTime {
    /// One microsecond in nanoseconds.
    pub const MICROSECOND: u64 = 1_000;
    /// One millisecond in nanoseconds.
    pub const MILLISECOND: u64 = 1_000_000;
    /// One second in nanoseconds.
    pub const SECOND: u64 = 1_000_000_000;

    /// Sentinel for "no deadline" / "never" — the maximum representable time.
    pub const INVALID: SimTime = SimTime(u64::MAX);

    /// The start of the simulation.
    pub const ZERO: SimTime = SimTime(0);

    /// Build a `SimTime` from a raw nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    /// Build a `SimTime` from a millisecond count.
    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(Self::MILLISECOND))
    }

    /// Build a `SimTime` from a second count.
    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs.saturating_mul(Self::SECOND))
    }

    /// The raw nanosecond count.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// The time as a fractional number of seconds, for human-readable logs.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / Self::SECOND as f64
    }

    /// Whether this time is the `INVALID` sentinel.
    pub const fn is_invalid(self) -> bool {
        self.0 == u64::MAX
    }

    /// Add a duration given in nanoseconds, saturating at `INVALID`.
    pub const fn add_nanos(self, nanos: u64) -> Self {
        SimTime(self.0.saturating_add(nanos))
    }

    /// Convert to a `std::time::Duration` since epoch 0, for PCAP timestamps.
    pub fn to_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "INVALID")
        } else {
            write!(f, "{:.9}s", self.as_secs_f64())
        }
    }
}

impl Add<u64> for SimTime {
    type Output = SimTime;
    fn add(self, nanos: u64) -> SimTime {
        self.add_nanos(nanos)
    }
}

impl AddAssign<u64> for SimTime {
    fn add_assign(&mut self, nanos: u64) {
        *self = self.add_nanos(nanos);
    }
}

impl Sub for SimTime {
    type Output = u64;
    /// Nanoseconds elapsed from `rhs` to `self`. Saturates to zero if `rhs`
    /// is later, since callers computing elapsed durations never expect a
    /// negative result.
    fn sub(self, rhs: SimTime) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_numeric() {
        assert!(SimTime::from_millis(1) < SimTime::from_millis(2));
        assert!(SimTime::ZERO < SimTime::from_nanos(1));
        assert!(SimTime::from_secs(1) < SimTime::INVALID);
    }

    #[test]
    fn invalid_is_max() {
        assert!(SimTime::INVALID.is_invalid());
        assert!(!SimTime::ZERO.is_invalid());
    }

    #[test]
    fn add_saturates() {
        let t = SimTime::from_nanos(u64::MAX - 1);
        assert_eq!(t.add_nanos(10), SimTime::INVALID);
    }

    #[test]
    fn constants_convert() {
        assert_eq!(SimTime::from_millis(10).as_nanos(), 10 * SimTime::MILLISECOND);
        assert_eq!(SimTime::from_secs(1).as_nanos(), SimTime::SECOND);
    }

    #[test]
    fn subtraction_saturates_at_zero() {
        let earlier = SimTime::from_millis(5);
        let later = SimTime::from_millis(10);
        assert_eq!(later - earlier, 5 * SimTime::MILLISECOND);
        assert_eq!(earlier - later, 0);
    }
}
