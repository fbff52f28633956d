//! Timestamps and timescale conversion.

use std::fmt;
use std::time::Duration;

/// A point in time expressed as `value / timescale` seconds.
///
/// Values may be negative. Conversion to another timescale rounds toward
/// negative infinity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    value: i64,
    timescale: u32,
}

impl Timestamp {
    /// Milliseconds.
    pub const MILLIS: u32 = 1000;
    /// Nanoseconds.
    pub const NANOS: u32 = 1_000_000_000;

    /// Create a timestamp. Panics if `timescale` is zero.
    pub fn new(value: i64, timescale: u32) -> Self {
        assert!(timescale > 0, "timescale must be non-zero");
        Self { value, timescale }
    }

    pub fn zero() -> Self {
        Self::new(0, 1)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::new(ms, Self::MILLIS)
    }

    pub fn from_duration(d: Duration) -> Self {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        Self::new(nanos, Self::NANOS)
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Convert to ticks of `timescale`, flooring and saturating at the `i64` range.
    pub fn to_ticks(&self, timescale: u32) -> i64 {
        if timescale == self.timescale {
            return self.value;
        }
        let scaled = (self.value as i128 * timescale as i128).div_euclid(self.timescale as i128);
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}/{})", self.value, self.timescale)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self::from_duration(d)
    }
}

/// Rescale an unsigned tick count between timescales, flooring.
pub fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == to || from == 0 {
        return value;
    }
    let scaled = value as u128 * to as u128 / from as u128;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}
