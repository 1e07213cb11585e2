//! Retry policy for ledger queries

use std::time::Duration;

use backoff::backoff::Backoff;

/// Retries at a fixed `interval`, at most `retries` times.
#[derive(Debug, Clone)]
pub struct FixedRetries {
    interval: Duration,
    retries: usize,
    remaining: usize,
}

impl FixedRetries {
    pub fn new(interval: Duration, retries: usize) -> Self {
        Self {
            interval,
            retries,
            remaining: retries,
        }
    }
}

impl Backoff for FixedRetries {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.checked_sub(1)?;
        Some(self.interval)
    }

    fn reset(&mut self) {
        self.remaining = self.retries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_the_configured_number_of_retries() {
        let mut policy = FixedRetries::new(Duration::from_millis(5), 2);
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert!(policy.next_backoff().is_some());
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let mut policy = FixedRetries::new(Duration::from_millis(5), 0);
        assert_eq!(policy.next_backoff(), None);
    }
}
