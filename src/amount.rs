//! Exact fixed-point money amounts
//!
//! Balances, bets, and payouts are stored as integer hundredths (two decimal
//! places) and travel over the wire as decimal strings like "10.00". Binary
//! floats are never used for money, so settlement arithmetic cannot drift.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of minor units per whole unit (two decimal places).
const SCALE: u64 = 100;

/// A non-negative money amount in minor units (hundredths).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build from minor units (e.g. cents).
    pub const fn from_minor(minor: u64) -> Self {
        Amount(minor)
    }

    /// Build from a whole number of units.
    pub const fn from_units(units: u64) -> Self {
        Amount(units * SCALE)
    }

    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Subtraction that fails rather than wrapping below zero. The "balance
    /// never negative" invariant rests on this returning None.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// Integer percentage of this amount, truncated toward zero. None if
    /// the intermediate product overflows.
    pub fn percent(self, pct: u64) -> Option<Amount> {
        self.0.checked_mul(pct).map(|v| Amount(v / 100))
    }

    /// Half of this amount, truncated toward zero.
    pub fn halved(self) -> Amount {
        Amount(self.0 / 2)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / SCALE, self.0 % SCALE)
    }
}

/// Parse error for decimal amount strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}'")]
pub struct ParseAmountError(pub String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Accepts "12", "12.5", and "12.50". Negative values, more than two
    /// fractional digits, and anything non-numeric are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let s = s.trim();
        if s.is_empty() {
            return Err(err());
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(err());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }

        let units: u64 = whole.parse().map_err(|_| err())?;
        let minor = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| err())? * 10,
            _ => frac.parse::<u64>().map_err(|_| err())?,
        };

        units
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(minor))
            .map(Amount)
            .ok_or_else(err)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
