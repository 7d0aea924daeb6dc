//! Time bases and timestamp rescaling between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The unit fraction (`num/den` seconds) a stream expresses its timestamps in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// Shared unit used for every frame and packet crossing a queue boundary.
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub const fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "denominator cannot be zero");
        Self { num, den }
    }

    /// `1/rate`, e.g. `1/25` for a 25 fps video stream or `1/44100` for audio.
    /// Ticks of `1/rate`, clamped to `1..=i32::MAX`.
    pub fn per_second(rate: u32) -> Self {
        Self::new(1, i32::try_from(rate.max(1)).unwrap_or(i32::MAX))
    }

    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Rescale `value` from this time base into `to`, rounding half away from zero.
    pub fn rescale(self, value: i64, to: TimeBase) -> i64 {
        if self == to || to.num == 0 {
            return value;
        }
        let n = value as i128 * self.num as i128 * to.den as i128;
        let d = self.den as i128 * to.num as i128;
        round_div(n, d).clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn rescale_opt(self, value: Option<i64>, to: TimeBase) -> Option<i64> {
        value.map(|v| self.rescale(v, to))
    }
}

fn round_div(n: i128, d: i128) -> i128 {
    let (n, d) = if d < 0 { (-n, -d) } else { (n, d) };
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl fmt::Debug for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for TimeBase {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num, den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_to_millis() {
        let tb = TimeBase::new(1, 90000);
        assert_eq!(tb.rescale(90000, TimeBase::MILLIS), 1000);
        assert_eq!(tb.rescale(3003, TimeBase::MILLIS), 33);
    }

    #[test]
    fn rescale_frame_index_to_stream() {
        let fps = TimeBase::per_second(25);
        assert_eq!(fps.rescale(1, TimeBase::new(1, 12800)), 512);
        assert_eq!(fps.rescale(250, TimeBase::MILLIS), 10000);
    }

    #[test]
    fn per_second_clamps_rate() {
        assert_eq!(TimeBase::per_second(0), TimeBase::new(1, 1));
        assert_eq!(TimeBase::per_second(u32::MAX), TimeBase::new(1, i32::MAX));
        assert!(TimeBase::per_second(u32::MAX).to_f64() > 0.0);
    }

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let tb = TimeBase::new(1, 2000);
        assert_eq!(tb.rescale(1, TimeBase::MILLIS), 1);
        assert_eq!(tb.rescale(-1, TimeBase::MILLIS), -1);
        assert_eq!(tb.rescale(2, TimeBase::MILLIS), 1);
    }

    #[test]
    fn rescale_same_base_is_identity() {
        let tb = TimeBase::new(1, 44100);
        assert_eq!(tb.rescale(1024, tb), 1024);
        assert_eq!(tb.rescale_opt(None, TimeBase::MILLIS), None);
    }

    #[test]
    #[should_panic(expected = "denominator cannot be zero")]
    fn zero_denominator_panics() {
        TimeBase::new(1, 0);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", TimeBase::new(1, 25)), "1/25");
    }
}
