//! Per-tick budget for AI media description attempts.
//!
//! Downloads and description calls are the expensive part of a tick; the
//! budget bounds how many run before the remaining media fall back to
//! `budget_exhausted` records. The tick loop resets it at tick start.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Shared countdown of remaining description attempts for this tick.
#[derive(Clone, Default)]
pub struct DescriptionBudget {
    remaining: Arc<AtomicI64>,
}

impl DescriptionBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset at the start of a tick.
    pub fn reset(&self, amount: u32) {
        self.remaining.store(i64::from(amount), Ordering::Relaxed);
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Relaxed).max(0)
    }

    /// Consume one unit if available.
    pub fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current > 0).then_some(current - 1)
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::DescriptionBudget;

    #[test]
    fn consumes_down_to_zero() {
        let budget = DescriptionBudget::new();
        budget.reset(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn reset_restores_the_allowance() {
        let budget = DescriptionBudget::new();
        budget.reset(1);
        assert!(budget.try_consume());
        budget.reset(1);
        assert!(budget.try_consume());
    }
}
