//! Fixed-point monetary amounts
//!
//! Budgets and costs are summed across an entire agent tree, so they are kept
//! as whole nano-dollars instead of floats. Addition and comparison are exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

const NANOS_PER_DOLLAR: i64 = 1_000_000_000;
const FRACTION_DIGITS: usize = 9;

/// A US dollar amount with nano-dollar precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Usd(i64);

impl Usd {
    pub const ZERO: Usd = Usd(0);
    pub const MAX: Usd = Usd(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn nanos(&self) -> i64 {
        self.0
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * NANOS_PER_DOLLAR)
    }

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents * (NANOS_PER_DOLLAR / 100))
    }

    /// Convert a float (e.g. from a config file), rounding to the nearest nano-dollar
    pub fn from_dollars_f64(dollars: f64) -> Self {
        Self((dollars * NANOS_PER_DOLLAR as f64).round() as i64)
    }

    /// Lossy conversion for display and ratios only
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_DOLLAR as f64
    }

    /// Cost of `tokens` at a per-million-token price
    pub fn per_million_tokens(price: Usd, tokens: u64) -> Self {
        let nanos = (price.0 as i128 * tokens as i128) / 1_000_000;
        Self(nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Scale by a fraction in [0, 1], rounding down
    pub fn scale(&self, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        Self((self.0 as f64 * fraction).floor() as i64)
    }

    pub fn saturating_sub(self, other: Usd) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }

    pub fn saturating_add(self, other: Usd) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Plain decimal form without a currency sign, e.g. `0.400000000`
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / NANOS_PER_DOLLAR as u64;
        let frac = abs % NANOS_PER_DOLLAR as u64;
        format!("{}{}.{:09}", sign, whole, frac)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Four places is what humans read; the full value is in to_decimal_string
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / NANOS_PER_DOLLAR as u64;
        let frac = (abs % NANOS_PER_DOLLAR as u64) / 100_000;
        write!(f, "{}${}.{:04}", sign, whole, frac)
    }
}

impl FromStr for Usd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let rest = rest.strip_prefix('$').unwrap_or(rest);

        if rest.is_empty() {
            return Err(format!("Invalid amount: {}", s));
        }

        let (whole, frac) = match rest.split_once('.') {
            Some((w, f)) => (w, f),
            None => (rest, ""),
        };

        if frac.len() > FRACTION_DIGITS {
            return Err(format!("Too many decimal places in amount: {}", s));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("Invalid amount: {}", s));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("Invalid amount: {}", s))?
        };

        let mut frac_nanos: i64 = 0;
        if !frac.is_empty() {
            let padded = format!("{:0<9}", frac);
            frac_nanos = padded
                .parse()
                .map_err(|_| format!("Invalid amount: {}", s))?;
        }

        let nanos = whole
            .checked_mul(NANOS_PER_DOLLAR)
            .and_then(|w| w.checked_add(frac_nanos))
            .ok_or_else(|| format!("Amount out of range: {}", s))?;

        Ok(Self(if negative { -nanos } else { nanos }))
    }
}

impl TryFrom<String> for Usd {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Usd> for String {
    fn from(value: Usd) -> Self {
        value.to_decimal_string()
    }
}

impl Add for Usd {
    type Output = Usd;

    fn add(self, rhs: Usd) -> Usd {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Usd {
    fn add_assign(&mut self, rhs: Usd) {
        *self = *self + rhs;
    }
}

impl Sub for Usd {
    type Output = Usd;

    fn sub(self, rhs: Usd) -> Usd {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Usd>>(iter: I) -> Usd {
        iter.fold(Usd::ZERO, |acc, x| acc + x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact() {
        assert_eq!("1.00".parse::<Usd>().unwrap(), Usd::from_dollars(1));
        assert_eq!("0.4".parse::<Usd>().unwrap(), Usd::from_cents(40));
        assert_eq!("$2.5".parse::<Usd>().unwrap(), Usd::from_cents(250));
        assert_eq!(".25".parse::<Usd>().unwrap(), Usd::from_cents(25));
        assert!("abc".parse::<Usd>().is_err());
        assert!("1.0000000001".parse::<Usd>().is_err());
        assert!("".parse::<Usd>().is_err());
    }

    #[test]
    fn test_repeated_addition_is_exact() {
        // 0.1 + 0.2 style drift must not happen
        let mut total = Usd::ZERO;
        for _ in 0..10 {
            total += "0.1".parse().unwrap();
        }
        assert_eq!(total, Usd::from_dollars(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Usd::from_cents(40).to_string(), "$0.4000");
        assert_eq!(Usd::from_dollars(12).to_string(), "$12.0000");
        assert_eq!(Usd::from_cents(40).to_decimal_string(), "0.400000000");
    }

    #[test]
    fn test_per_million_tokens() {
        // $3 per million tokens, 1000 tokens = $0.003
        let price = Usd::from_dollars(3);
        assert_eq!(Usd::per_million_tokens(price, 1000), "0.003".parse().unwrap());
        // $22.50 per million, 2 tokens
        let price: Usd = "22.50".parse().unwrap();
        assert_eq!(Usd::per_million_tokens(price, 2).nanos(), 45_000);
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Usd::from_cents(10);
        let b = Usd::from_cents(30);
        assert_eq!(a.saturating_sub(b), Usd::ZERO);
        assert_eq!(b.saturating_sub(a), Usd::from_cents(20));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Usd::from_cents(125)).unwrap();
        assert_eq!(json, "\"1.250000000\"");
        let back: Usd = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Usd::from_cents(125));
    }

    #[test]
    fn test_scale() {
        assert_eq!(Usd::from_dollars(1).scale(0.5), Usd::from_cents(50));
        assert_eq!(Usd::from_dollars(1).scale(2.0), Usd::from_dollars(1));
    }
}
