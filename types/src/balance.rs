use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::amount::Cents;

/// The two independent ledgers a user holds. They are never commingled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    /// Gold coins: play currency, never withdrawable.
    #[serde(rename = "GC")]
    Gc,
    /// Sweeps coins: redeemable currency.
    #[serde(rename = "SC")]
    Sc,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gc => "GC",
            Currency::Sc => "SC",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GC" => Ok(Self::Gc),
            "SC" => Ok(Self::Sc),
            _ => Err("valid values: GC, SC"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient {currency} balance (needed={needed}, available={available})")]
    Insufficient {
        currency: Currency,
        needed: Cents,
        available: Cents,
    },
    #[error("amount must be positive (got {0})")]
    NonPositive(Cents),
    #[error("{currency} balance overflow")]
    Overflow { currency: Currency },
}

/// Per-user dual-currency balance, all in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    #[serde(rename = "availableGC")]
    pub available_gc: Cents,
    #[serde(rename = "lockedGC")]
    pub locked_gc: Cents,
    #[serde(rename = "totalSC")]
    pub total_sc: Cents,
    #[serde(rename = "redeemableSC")]
    pub redeemable_sc: Cents,
}

impl Balance {
    /// Funds a wager in `currency` may draw from.
    pub fn available(&self, currency: Currency) -> Cents {
        match currency {
            Currency::Gc => self.available_gc,
            Currency::Sc => self.total_sc,
        }
    }

    /// Remove a stake. Redeemable SC is clamped so it never exceeds the total.
    pub fn debit(&mut self, currency: Currency, amount: Cents) -> Result<(), BalanceError> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositive(amount));
        }
        let available = self.available(currency);
        if amount > available {
            return Err(BalanceError::Insufficient {
                currency,
                needed: amount,
                available,
            });
        }
        match currency {
            Currency::Gc => {
                self.available_gc = Cents(self.available_gc.0 - amount.0);
            }
            Currency::Sc => {
                self.total_sc = Cents(self.total_sc.0 - amount.0);
                self.redeemable_sc = self.redeemable_sc.min(self.total_sc);
            }
        }
        Ok(())
    }

    /// Add a payout or grant. SC credits are redeemable.
    pub fn credit(&mut self, currency: Currency, amount: Cents) -> Result<(), BalanceError> {
        if !amount.is_positive() {
            return Err(BalanceError::NonPositive(amount));
        }
        match currency {
            Currency::Gc => {
                self.available_gc = self
                    .available_gc
                    .checked_add(amount)
                    .ok_or(BalanceError::Overflow { currency })?;
            }
            Currency::Sc => {
                let total = self
                    .total_sc
                    .checked_add(amount)
                    .ok_or(BalanceError::Overflow { currency })?;
                let redeemable = self
                    .redeemable_sc
                    .checked_add(amount)
                    .ok_or(BalanceError::Overflow { currency })?;
                self.total_sc = total;
                self.redeemable_sc = redeemable.min(total);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_rejects_overdraw() {
        let mut balance = Balance {
            available_gc: Cents(100),
            ..Default::default()
        };
        let err = balance.debit(Currency::Gc, Cents(101)).unwrap_err();
        assert_eq!(
            err,
            BalanceError::Insufficient {
                currency: Currency::Gc,
                needed: Cents(101),
                available: Cents(100),
            }
        );
        assert_eq!(balance.available_gc, Cents(100));
        balance.debit(Currency::Gc, Cents(100)).unwrap();
        assert_eq!(balance.available_gc, Cents::ZERO);
    }

    #[test]
    fn currencies_are_independent() {
        let mut balance = Balance {
            available_gc: Cents(500),
            total_sc: Cents(50),
            redeemable_sc: Cents(50),
            ..Default::default()
        };
        assert!(balance.debit(Currency::Sc, Cents(100)).is_err());
        balance.debit(Currency::Gc, Cents(100)).unwrap();
        assert_eq!(balance.total_sc, Cents(50));
        assert_eq!(balance.available_gc, Cents(400));
    }

    #[test]
    fn redeemable_never_exceeds_total() {
        let mut balance = Balance {
            total_sc: Cents(1_000),
            redeemable_sc: Cents(300),
            ..Default::default()
        };
        balance.debit(Currency::Sc, Cents(800)).unwrap();
        assert_eq!(balance.total_sc, Cents(200));
        assert_eq!(balance.redeemable_sc, Cents(200));

        balance.credit(Currency::Sc, Cents(150)).unwrap();
        assert_eq!(balance.total_sc, Cents(350));
        assert_eq!(balance.redeemable_sc, Cents(350));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut balance = Balance::default();
        assert_eq!(
            balance.credit(Currency::Gc, Cents::ZERO),
            Err(BalanceError::NonPositive(Cents::ZERO))
        );
        assert_eq!(
            balance.debit(Currency::Gc, Cents(-1)),
            Err(BalanceError::NonPositive(Cents(-1)))
        );
    }

    #[test]
    fn serializes_with_legacy_field_names() {
        let balance = Balance {
            available_gc: Cents(1_050),
            ..Default::default()
        };
        let json = serde_json::to_value(balance).unwrap();
        assert_eq!(json["availableGC"], 10.5);
        assert_eq!(json["redeemableSC"], 0.0);
    }
}
