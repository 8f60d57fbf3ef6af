use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window limiting how often an operation may be retried
///
/// Each call to [`try_admit`](RetryWindow::try_admit) records an attempt.
/// Attempts older than the window no longer count against the limit, so a
/// subscription that has been healthy for a while regains its full retry
/// budget.
#[derive(Debug)]
pub struct RetryWindow {
    limit: usize,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl RetryWindow {
    /// Creates a window admitting at most `limit` attempts per `window`
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            attempts: VecDeque::new(),
        }
    }

    /// Records an attempt and reports whether it is within the budget
    pub fn try_admit(&mut self) -> bool {
        let now = Instant::now();

        while let Some(first) = self.attempts.front() {
            if now.duration_since(*first) > self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }

        if self.attempts.len() >= self.limit {
            return false;
        }

        self.attempts.push_back(now);
        true
    }
}
