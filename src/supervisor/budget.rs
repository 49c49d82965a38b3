//! Rolling-window restart budget
//!
//! Each channel may consume at most `max_attempts` auto-restart
//! attempts inside a rolling window. The window restarts when it
//! expires with no attempt; operator intervention (stop, successful
//! restart) clears the counter early.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Window {
    attempts: u32,
    opened_at: Instant,
}

/// Per-channel restart attempt accounting.
pub struct RestartBudget {
    max_attempts: u32,
    window: Duration,
    counters: Mutex<HashMap<Uuid, Window>>,
}

impl RestartBudget {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    /// Record one attempt. `Ok(n)` is the attempt number inside the
    /// current window; `Err(n)` means the budget is exhausted and the
    /// attempt must not proceed.
    pub fn try_consume(&self, channel_id: Uuid) -> Result<u32, u32> {
        let mut counters = self.counters.lock();
        let entry = counters.entry(channel_id).or_insert(Window {
            attempts: 0,
            opened_at: Instant::now(),
        });

        if entry.opened_at.elapsed() > self.window {
            entry.attempts = 0;
            entry.opened_at = Instant::now();
        }

        if entry.attempts >= self.max_attempts {
            return Err(entry.attempts);
        }
        entry.attempts += 1;
        Ok(entry.attempts)
    }

    /// Clear the counter after a successful restart or operator stop.
    pub fn reset(&self, channel_id: Uuid) {
        self.counters.lock().remove(&channel_id);
    }

    /// Current attempt count inside the window (diagnostics).
    pub fn attempts(&self, channel_id: Uuid) -> u32 {
        self.counters
            .lock()
            .get(&channel_id)
            .map(|w| {
                if w.opened_at.elapsed() > self.window {
                    0
                } else {
                    w.attempts
                }
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_at_cap() {
        let budget = RestartBudget::new(3, Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert_eq!(budget.try_consume(id), Ok(1));
        assert_eq!(budget.try_consume(id), Ok(2));
        assert_eq!(budget.try_consume(id), Ok(3));
        // The (N+1)th attempt inside the window is suppressed
        assert_eq!(budget.try_consume(id), Err(3));
        assert_eq!(budget.try_consume(id), Err(3));
    }

    #[test]
    fn test_budget_is_per_channel() {
        let budget = RestartBudget::new(1, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(budget.try_consume(a), Ok(1));
        assert_eq!(budget.try_consume(b), Ok(1));
        assert!(budget.try_consume(a).is_err());
    }

    #[test]
    fn test_reset_reopens_budget() {
        let budget = RestartBudget::new(1, Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert_eq!(budget.try_consume(id), Ok(1));
        assert!(budget.try_consume(id).is_err());
        budget.reset(id);
        assert_eq!(budget.try_consume(id), Ok(1));
    }

    #[test]
    fn test_window_expiry_reopens_budget() {
        let budget = RestartBudget::new(1, Duration::from_millis(10));
        let id = Uuid::new_v4();

        assert_eq!(budget.try_consume(id), Ok(1));
        assert!(budget.try_consume(id).is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(budget.try_consume(id), Ok(1));
    }
}
