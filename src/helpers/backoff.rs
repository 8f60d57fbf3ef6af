use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Yields the configured initial delay first and doubles it on every
/// subsequent call, up to a fixed number of attempts after which the iterator
/// is exhausted.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    limit: u32,
    delay: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` with at most `limit` attempts
    pub fn new(initial: Duration, limit: u32) -> Self {
        Self {
            attempts: 0,
            limit,
            delay: initial,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), 16)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.attempts >= self.limit {
            return None;
        }

        self.attempts += 1;

        let delay = self.delay;
        self.delay *= 2;

        Some(delay)
    }
}
