//! Rolling send window

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Timestamps of recent sends within a fixed rolling window
#[derive(Debug)]
pub struct SendWindow {
    span: Duration,
    max_sends: usize,
    sent: VecDeque<Instant>,
}

impl SendWindow {
    pub fn new(span: Duration, max_sends: usize) -> Self {
        Self {
            span,
            max_sends: max_sends.max(1),
            sent: VecDeque::with_capacity(max_sends),
        }
    }

    /// Sends per second window used for chat delivery
    pub fn per_second(max_sends: usize) -> Self {
        Self::new(Duration::from_secs(1), max_sends)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.sent.front() {
            if now.duration_since(*oldest) >= self.span {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether another send fits in the window ending at `now`
    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.sent.len() < self.max_sends
    }

    pub fn record(&mut self, at: Instant) {
        self.sent.push_back(at);
    }

    /// Sends recorded in the window as of the last capacity check
    pub fn recent_sends(&self) -> usize {
        self.sent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_fills_and_expires() {
        let mut window = SendWindow::per_second(3);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(window.has_capacity(start));
            window.record(start);
        }
        assert!(!window.has_capacity(start));
        assert!(!window.has_capacity(start + Duration::from_millis(999)));
        assert!(window.has_capacity(start + Duration::from_secs(1)));
        assert_eq!(window.recent_sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_expiry() {
        let mut window = SendWindow::per_second(2);
        let start = Instant::now();
        window.record(start);
        window.record(start + Duration::from_millis(600));
        assert!(!window.has_capacity(start + Duration::from_millis(700)));
        assert!(window.has_capacity(start + Duration::from_millis(1000)));
        assert_eq!(window.recent_sends(), 1);
    }
}
