//! Deadline accounting shared across a chain of remote calls.
//!
//! A [`DeadlineClock`] is started once at the beginning of a wait chain
//! (before the submission call) and consulted before every sleep. It never
//! resets, so submission latency and every poll round-trip count against
//! the same budget.

use crate::error::{RunError, RunResult};
use std::time::Duration;
use tokio::time::Instant;

/// Overall wall-clock budget for one logical wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Deadline {
    /// No limit
    #[default]
    Unbounded,
    /// Must finish within the given duration of the clock start
    Within(Duration),
}

impl Deadline {
    /// Interpret a signed millisecond budget; negative values mean unbounded.
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Self::Unbounded
        } else {
            Self::Within(Duration::from_millis(ms as u64))
        }
    }

    /// Signed millisecond form, `-1` for unbounded.
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::Unbounded => -1,
            Self::Within(limit) => i64::try_from(limit.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::Within(_))
    }

    fn exceeded(&self) -> RunError {
        RunError::DeadlineExceeded {
            budget_ms: self.as_millis().max(0) as u64,
        }
    }
}

/// What is left of a [`Deadline`] at some point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unbounded,
    Remaining(Duration),
    Exhausted,
}

impl Budget {
    /// Clamp a requested sleep to the remaining budget.
    ///
    /// Returns `None` when the budget is exhausted.
    pub fn clamp(&self, delay: Duration) -> Option<Duration> {
        match self {
            Self::Unbounded => Some(delay),
            Self::Remaining(left) => Some(delay.min(*left)),
            Self::Exhausted => None,
        }
    }
}

/// Remaining budget of `deadline` after `elapsed`.
pub fn remaining(deadline: Deadline, elapsed: Duration) -> Budget {
    match deadline {
        Deadline::Unbounded => Budget::Unbounded,
        Deadline::Within(limit) => match limit.checked_sub(elapsed) {
            Some(left) if !left.is_zero() => Budget::Remaining(left),
            _ => Budget::Exhausted,
        },
    }
}

/// A [`Deadline`] anchored at the instant its wait chain started.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineClock {
    deadline: Deadline,
    started: Instant,
}

impl DeadlineClock {
    /// Start the clock now.
    pub fn start(deadline: Deadline) -> Self {
        Self {
            deadline,
            started: Instant::now(),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Budget {
        remaining(self.deadline, self.elapsed())
    }

    /// Duration to sleep for a server-reported delay.
    ///
    /// Fails with `DeadlineExceeded` once the budget is used up; otherwise
    /// the delay is clamped so the sleep never ends past the deadline.
    pub fn next_sleep(&self, delay: Duration) -> RunResult<Duration> {
        self.remaining()
            .clamp(delay)
            .ok_or_else(|| self.deadline.exceeded())
    }
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A clamped sleep added to the elapsed time never passes the deadline.
        #[test]
        fn prop_clamped_sleep_never_overshoots(
            limit_ms in 0u64..100_000,
            elapsed_ms in 0u64..200_000,
            delay_ms in 1u64..100_000,
        ) {
            let deadline = Deadline::from_millis(limit_ms as i64);
            let budget = remaining(deadline, Duration::from_millis(elapsed_ms));
            match budget.clamp(Duration::from_millis(delay_ms)) {
                Some(sleep) => {
                    prop_assert!(elapsed_ms < limit_ms);
                    prop_assert!(!sleep.is_zero());
                    prop_assert!(elapsed_ms + sleep.as_millis() as u64 <= limit_ms);
                }
                None => prop_assert!(elapsed_ms >= limit_ms),
            }
        }

        /// Unbounded deadlines never clamp.
        #[test]
        fn prop_unbounded_never_clamps(
            elapsed_ms in 0u64..u32::MAX as u64,
            delay_ms in 0u64..u32::MAX as u64,
        ) {
            let budget = remaining(Deadline::Unbounded, Duration::from_millis(elapsed_ms));
            prop_assert_eq!(
                budget.clamp(Duration::from_millis(delay_ms)),
                Some(Duration::from_millis(delay_ms))
            );
        }
    }
}
