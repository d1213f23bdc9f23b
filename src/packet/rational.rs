//! Rational time-base arithmetic

use serde::{Deserialize, Serialize};

/// A positive rational number used as a time-base (seconds per tick).
///
/// `1/90000` means each timestamp unit is 1/90000th of a second. Both parts
/// are non-zero for every value of this type, including deserialized ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRational", into = "RawRational")]
pub struct Rational {
    num: u32,
    den: u32,
}

/// Wire shape of [`Rational`], validated on the way in
#[derive(Serialize, Deserialize)]
struct RawRational {
    num: u32,
    den: u32,
}

impl TryFrom<RawRational> for Rational {
    type Error = String;

    fn try_from(raw: RawRational) -> Result<Self, Self::Error> {
        Rational::try_new(raw.num, raw.den)
            .ok_or_else(|| format!("time-base must be non-zero, got {}/{}", raw.num, raw.den))
    }
}

impl From<Rational> for RawRational {
    fn from(rational: Rational) -> Self {
        RawRational {
            num: rational.num,
            den: rational.den,
        }
    }
}

impl Rational {
    /// Create a new time-base
    ///
    /// Panics if either part is zero.
    pub const fn new(num: u32, den: u32) -> Self {
        assert!(num != 0 && den != 0, "time-base must be non-zero");
        Self { num, den }
    }

    /// Create a time-base, returning `None` for a zero numerator or denominator
    pub fn try_new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            None
        } else {
            Some(Self { num, den })
        }
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    /// Value as floating point seconds per tick
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Convert `value` ticks of `self` into ticks of `to`.
    ///
    /// Computed as `value * self / to` in 128-bit integers, rounding half
    /// away from zero. Results outside the `i64` range saturate.
    pub fn rescale(&self, value: i64, to: Rational) -> i64 {
        let num = value as i128 * self.num as i128 * to.den as i128;
        let den = self.den as i128 * to.num as i128;
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Convert a tick count into seconds
    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.as_f64()
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
