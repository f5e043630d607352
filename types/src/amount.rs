//! Fixed-point money and multiplier types.
//!
//! Money is always held as signed integer cents. Multipliers are held as
//! integer hundredths (`1.00x == 100`). Conversions from JSON decimals are only
//! accepted when the value is exact to the cent, so no rounding ever happens
//! on the way in.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Cents per whole unit.
pub const CENTS_PER_UNIT: i64 = 100;

/// Hundredths per `1.00x`.
pub const MULTIPLIER_SCALE: u64 = 100;

/// Largest decimal amount accepted from callers (exactly representable in f64).
const MAX_DECIMAL_CENTS: i64 = 1 << 52;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is not a finite number")]
    NotFinite,
    #[error("amount {value} has more than two decimal places")]
    TooPrecise { value: String },
    #[error("amount {value} is out of range")]
    OutOfRange { value: String },
}

/// An amount of money in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    /// Parse a decimal amount, rejecting anything that is not exact to the cent.
    pub fn from_decimal(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite);
        }
        let scaled = value * CENTS_PER_UNIT as f64;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(AmountError::TooPrecise {
                value: value.to_string(),
            });
        }
        if rounded.abs() > MAX_DECIMAL_CENTS as f64 {
            return Err(AmountError::OutOfRange {
                value: value.to_string(),
            });
        }
        Ok(Self(rounded as i64))
    }

    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / CENTS_PER_UNIT as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    pub fn checked_sub(self, other: Cents) -> Option<Cents> {
        self.0.checked_sub(other.0).map(Cents)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            abs / CENTS_PER_UNIT as u64,
            abs % CENTS_PER_UNIT as u64
        )
    }
}

impl Serialize for Cents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_decimal())
    }
}

impl<'de> Deserialize<'de> for Cents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Cents::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

/// A payout multiplier in hundredths (`Multiplier(192)` is `1.92x`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(pub u64);

impl Multiplier {
    pub const ZERO: Multiplier = Multiplier(0);
    pub const ONE: Multiplier = Multiplier(MULTIPLIER_SCALE);

    /// Quantize a raw multiplier down to two decimals.
    ///
    /// Flooring (never rounding) keeps the configured house edge intact.
    pub fn floor_from_f64(raw: f64) -> Self {
        if !raw.is_finite() || raw <= 0.0 {
            return Self::ZERO;
        }
        // Nudge by a tiny epsilon so values like 1.92 (stored as 1.919999..)
        // floor to the intended hundredth.
        let scaled = (raw * MULTIPLIER_SCALE as f64 + 1e-9).floor();
        if scaled >= u64::MAX as f64 {
            return Self(u64::MAX);
        }
        Self(scaled as u64)
    }

    /// Parse a decimal multiplier given to two decimals.
    pub fn from_decimal(value: f64) -> Result<Self, AmountError> {
        let cents = Cents::from_decimal(value)?;
        if cents.0 < 0 {
            return Err(AmountError::OutOfRange {
                value: value.to_string(),
            });
        }
        Ok(Self(cents.0 as u64))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MULTIPLIER_SCALE as f64
    }

    /// Payout for a stake at this multiplier, rounded half-up to the cent.
    ///
    /// This is the single rounding step between a multiplier and money.
    pub fn payout(self, stake: Cents) -> Cents {
        let stake = stake.0.max(0) as u128;
        let scaled = stake * self.0 as u128;
        let half = MULTIPLIER_SCALE as u128 / 2;
        let cents = (scaled + half) / MULTIPLIER_SCALE as u128;
        Cents(cents.min(i64::MAX as u128) as i64)
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}x",
            self.0 / MULTIPLIER_SCALE,
            self.0 % MULTIPLIER_SCALE
        )
    }
}

impl Serialize for Multiplier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Multiplier::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_cents() {
        assert_eq!(Cents::from_decimal(1.0).unwrap(), Cents(100));
        assert_eq!(Cents::from_decimal(0.1).unwrap(), Cents(10));
        assert_eq!(Cents::from_decimal(19.99).unwrap(), Cents(1999));
        assert_eq!(Cents::from_decimal(-2.5).unwrap(), Cents(-250));
    }

    #[test]
    fn rejects_sub_cent_amounts() {
        assert!(matches!(
            Cents::from_decimal(0.001),
            Err(AmountError::TooPrecise { .. })
        ));
        assert_eq!(Cents::from_decimal(f64::NAN), Err(AmountError::NotFinite));
        assert!(matches!(
            Cents::from_decimal(1e300),
            Err(AmountError::OutOfRange { .. })
        ));
    }

    #[test]
    fn display_formats_two_decimals() {
        assert_eq!(Cents(192).to_string(), "1.92");
        assert_eq!(Cents(-5).to_string(), "-0.05");
        assert_eq!(Multiplier(100).to_string(), "1.00x");
        assert_eq!(Multiplier(100_000_000).to_string(), "1000000.00x");
    }

    #[test]
    fn floor_never_rounds_up() {
        assert_eq!(Multiplier::floor_from_f64(1.92), Multiplier(192));
        assert_eq!(Multiplier::floor_from_f64(1.9299), Multiplier(192));
        assert_eq!(Multiplier::floor_from_f64(0.96 / 0.5), Multiplier(192));
        assert_eq!(Multiplier::floor_from_f64(-1.0), Multiplier::ZERO);
        assert_eq!(Multiplier::floor_from_f64(f64::INFINITY), Multiplier::ZERO);
    }

    #[test]
    fn payout_rounds_half_up_once() {
        assert_eq!(Multiplier(192).payout(Cents(100)), Cents(192));
        // 0.33 * 1.50x = 0.495 -> 0.50
        assert_eq!(Multiplier(150).payout(Cents(33)), Cents(50));
        // 0.33 * 1.49x = 0.4917 -> 0.49
        assert_eq!(Multiplier(149).payout(Cents(33)), Cents(49));
        assert_eq!(Multiplier::ZERO.payout(Cents(1_000)), Cents::ZERO);
    }

    #[test]
    fn serde_uses_decimals() {
        let json = serde_json::to_string(&Cents(1250)).unwrap();
        assert_eq!(json, "12.5");
        let parsed: Cents = serde_json::from_str("12.34").unwrap();
        assert_eq!(parsed, Cents(1234));
        assert!(serde_json::from_str::<Cents>("12.345").is_err());

        let multiplier: Multiplier = serde_json::from_str("1.5").unwrap();
        assert_eq!(multiplier, Multiplier(150));
    }
}
