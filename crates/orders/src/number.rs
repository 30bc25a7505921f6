//! Human-readable order numbers: `ORD-<YYYYMMDD>-<6 digits>`.
//!
//! Generators do not guarantee uniqueness; the order store rejects duplicates
//! and the caller asks for another number.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use storekeep_core::{DomainError, ValueObject};

const PREFIX: &str = "ORD";
const SUFFIX_SPACE: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn compose(date: NaiveDate, suffix: u32) -> Self {
        Self(format!(
            "{PREFIX}-{}-{:06}",
            date.format("%Y%m%d"),
            suffix % SUFFIX_SPACE
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for OrderNumber {}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::invalid_id(format!("OrderNumber: '{s}'"));
        let mut parts = s.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let digits = |part: &str, len: usize| {
            part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if prefix != PREFIX || !digits(date, 8) || !digits(suffix, 6) {
            return Err(invalid());
        }
        NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?;
        Ok(Self(s.to_string()))
    }
}

/// Source of order numbers for a given business date.
pub trait OrderNumberGenerator: Send + Sync {
    fn next_number(&self, date: NaiveDate) -> OrderNumber;
}

/// Random 6-digit suffixes from an injected generator.
///
/// Seed it in tests for reproducible numbers.
#[derive(Debug)]
pub struct RandomOrderNumbers<R> {
    rng: Mutex<R>,
}

impl<R: RngCore + Send> RandomOrderNumbers<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl RandomOrderNumbers<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore + Send> OrderNumberGenerator for RandomOrderNumbers<R> {
    fn next_number(&self, date: NaiveDate) -> OrderNumber {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        OrderNumber::compose(date, rng.gen_range(0..SUFFIX_SPACE))
    }
}

/// Monotonic suffixes (wrapping after 999999).
#[derive(Debug, Default)]
pub struct SequentialOrderNumbers {
    next: AtomicU32,
}

impl SequentialOrderNumbers {
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

impl OrderNumberGenerator for SequentialOrderNumbers {
    fn next_number(&self, date: NaiveDate) -> OrderNumber {
        OrderNumber::compose(date, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    #[test]
    fn compose_pads_suffix_to_six_digits() {
        assert_eq!(OrderNumber::compose(date(), 42).as_str(), "ORD-20260309-000042");
    }

    #[test]
    fn parse_accepts_composed_numbers_and_rejects_others() {
        let n = OrderNumber::compose(date(), 123_456);
        assert_eq!(n.as_str().parse::<OrderNumber>().unwrap(), n);

        for bad in ["ORD-2026039-000001", "INV-20260309-000001", "ORD-20260309-12345", "ORD-20261332-000001"] {
            assert!(bad.parse::<OrderNumber>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let a = RandomOrderNumbers::seeded(7);
        let b = RandomOrderNumbers::seeded(7);
        for _ in 0..5 {
            assert_eq!(a.next_number(date()), b.next_number(date()));
        }
    }

    #[test]
    fn sequential_numbers_increase() {
        let generator = SequentialOrderNumbers::starting_at(9);
        assert_eq!(generator.next_number(date()).as_str(), "ORD-20260309-000009");
        assert_eq!(generator.next_number(date()).as_str(), "ORD-20260309-000010");
    }
}
