//! Atomic daily change counter

use chrono::NaiveDate;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Slack for floating point sums compared against the cap
const CAP_EPSILON: f64 = 1e-9;

/// Running total of approved monthly savings per UTC day
///
/// `try_reserve` checks and increments under the DashMap entry lock for
/// that day, so two concurrent reservations can never jointly exceed the
/// cap.
#[derive(Debug)]
pub struct DailySpendLedger {
    cap: f64,
    reserved: DashMap<NaiveDate, f64>,
}

impl DailySpendLedger {
    pub fn new(cap: f64) -> Self {
        Self {
            cap,
            reserved: DashMap::new(),
        }
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Reserve `amount` against `day`; false and no change when it would overflow
    pub fn try_reserve(&self, day: NaiveDate, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            return false;
        }
        let mut entry = self.reserved.entry(day).or_insert(0.0);
        if *entry + amount > self.cap + CAP_EPSILON {
            return false;
        }
        *entry += amount;
        true
    }

    /// Return a reservation that did not lead to an approval
    pub fn release(&self, day: NaiveDate, amount: f64) {
        if let Some(mut entry) = self.reserved.get_mut(&day) {
            *entry = (*entry - amount).max(0.0);
        }
    }

    pub fn reserved(&self, day: NaiveDate) -> f64 {
        self.reserved.get(&day).map(|v| *v).unwrap_or(0.0)
    }

    pub fn remaining(&self, day: NaiveDate) -> f64 {
        (self.cap - self.reserved(day)).max(0.0)
    }

    /// Seed the counter from amounts already approved in the ledger
    pub fn restore(&self, amounts: BTreeMap<NaiveDate, f64>) {
        for (day, amount) in amounts {
            self.reserved.insert(day, amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_reserve_up_to_cap() {
        let ledger = DailySpendLedger::new(1000.0);
        assert!(ledger.try_reserve(day(), 400.0));
        assert!(ledger.try_reserve(day(), 400.0));
        assert!(!ledger.try_reserve(day(), 400.0));
        assert_eq!(ledger.reserved(day()), 800.0);
        assert_eq!(ledger.remaining(day()), 200.0);
    }

    #[test]
    fn test_release_returns_capacity() {
        let ledger = DailySpendLedger::new(500.0);
        assert!(ledger.try_reserve(day(), 500.0));
        ledger.release(day(), 500.0);
        assert!(ledger.try_reserve(day(), 300.0));
    }

    #[test]
    fn test_days_are_independent() {
        let ledger = DailySpendLedger::new(100.0);
        let tomorrow = day().succ_opt().unwrap();
        assert!(ledger.try_reserve(day(), 100.0));
        assert!(ledger.try_reserve(tomorrow, 100.0));
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        let ledger = DailySpendLedger::new(100.0);
        assert!(!ledger.try_reserve(day(), f64::NAN));
        assert!(!ledger.try_reserve(day(), -5.0));
        assert_eq!(ledger.reserved(day()), 0.0);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_cap() {
        let ledger = Arc::new(DailySpendLedger::new(1000.0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.try_reserve(day(), 300.0))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 3);
        assert!(ledger.reserved(day()) <= 1000.0);
    }
}
