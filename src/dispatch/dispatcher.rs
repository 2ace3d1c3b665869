//! Rate-limited, retrying message dispatcher
//!
//! State per destination is Idle -> Processing -> Idle. `enqueue` only appends
//! and, when idle, starts the drain task. The drain task delivers the head of
//! the queue one message at a time:
//! - success: timestamp recorded, message removed
//! - provider rate limit: message kept, retry count untouched, fixed cooldown
//! - other failure: retry count bumped, message dropped once the budget is spent
//!
//! A panic inside the drain task is caught by its supervisor, which resets the
//! state to Idle. Messages still queued at that point stay queued and are
//! drained by the next `enqueue`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::window::SendWindow;
use super::ChatSink;
use crate::config::DispatchConfig;

/// A message waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub destination: String,
    pub text: String,
    pub retry_count: u32,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
    pub rate_limited: u64,
    pub drain_panics: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    rate_limited: AtomicU64,
    drain_panics: AtomicU64,
}

struct Inner {
    destination: String,
    sink: Arc<dyn ChatSink>,
    window_backoff: Duration,
    rate_limit_cooldown: Duration,
    max_retries: u32,
    queue: Mutex<VecDeque<QueuedMessage>>,
    window: Mutex<SendWindow>,
    /// true while a drain task is running
    processing: watch::Sender<bool>,
    counters: Counters,
}

/// Single-destination dispatcher. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn new(
        destination: impl Into<String>,
        sink: Arc<dyn ChatSink>,
        config: &DispatchConfig,
    ) -> Self {
        let (processing, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                destination: destination.into(),
                sink,
                window_backoff: Duration::from_millis(config.window_backoff_ms),
                rate_limit_cooldown: Duration::from_millis(config.rate_limit_cooldown_ms),
                max_retries: config.max_retries.max(1),
                queue: Mutex::new(VecDeque::new()),
                window: Mutex::new(SendWindow::per_second(config.max_sends_per_second)),
                processing,
                counters: Counters::default(),
            }),
        }
    }

    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    /// Append messages and make sure a drain task is running.
    ///
    /// Blank messages are skipped. Returns the number of messages accepted.
    pub fn enqueue<I, S>(&self, texts: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut accepted = 0;
        {
            let mut queue = lock(&self.inner.queue);
            for text in texts {
                let text: String = text.into();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    warn!(destination = %self.inner.destination, "Skipping empty message");
                    continue;
                }
                queue.push_back(QueuedMessage {
                    destination: self.inner.destination.clone(),
                    text: trimmed.to_string(),
                    retry_count: 0,
                });
                accepted += 1;
            }
        }

        // Resume after an abandoned drain even when nothing new was accepted
        if accepted > 0 || !self.is_queue_empty() {
            self.start_processing();
        }
        accepted
    }

    fn start_processing(&self) {
        if self.inner.processing.send_replace(true) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let outcome = tokio::spawn(Inner::drain(Arc::clone(&inner))).await;

                if let Err(e) = outcome {
                    inner.counters.drain_panics.fetch_add(1, Ordering::Relaxed);
                    error!(
                        destination = %inner.destination,
                        pending = lock(&inner.queue).len(),
                        "Dispatcher drain loop aborted: {}",
                        e
                    );
                    inner.processing.send_replace(false);
                    break;
                }

                // Decided under the queue lock: an enqueue either lands before
                // this check and is drained by another pass, or sees the flag
                // cleared and starts its own task.
                let drained = {
                    let queue = lock(&inner.queue);
                    if queue.is_empty() {
                        inner.processing.send_replace(false);
                    }
                    queue.is_empty()
                };
                if drained {
                    break;
                }
            }
        });
    }

    /// Resolve once no drain task is running
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.processing.subscribe();
        let _ = rx.wait_for(|processing| !*processing).await;
    }

    pub fn is_processing(&self) -> bool {
        *self.inner.processing.borrow()
    }

    pub fn is_queue_empty(&self) -> bool {
        lock(&self.inner.queue).is_empty()
    }

    /// Snapshot of the queue, head first
    pub fn pending(&self) -> Vec<QueuedMessage> {
        lock(&self.inner.queue).iter().cloned().collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            drain_panics: c.drain_panics.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    async fn drain(self: Arc<Self>) {
        loop {
            let head = match lock(&self.queue).front() {
                Some(message) => message.text.clone(),
                None => break,
            };

            self.wait_for_slot().await;

            match self.sink.send(&self.destination, &head).await {
                Ok(()) => {
                    lock(&self.window).record(Instant::now());
                    lock(&self.queue).pop_front();
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(destination = %self.destination, "Message delivered");
                }
                Err(e) if e.is_rate_limit() => {
                    self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        destination = %self.destination,
                        cooldown_ms = self.rate_limit_cooldown.as_millis() as u64,
                        "Rate limited by chat provider: {}",
                        e
                    );
                    tokio::time::sleep(self.rate_limit_cooldown).await;
                }
                Err(e) => {
                    let mut queue = lock(&self.queue);
                    let attempts = match queue.front_mut() {
                        Some(message) => {
                            message.retry_count += 1;
                            message.retry_count
                        }
                        None => break,
                    };

                    if attempts >= self.max_retries {
                        queue.pop_front();
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        error!(
                            destination = %self.destination,
                            attempts,
                            "Permanent delivery failure, message dropped: {}",
                            e
                        );
                    } else {
                        warn!(
                            destination = %self.destination,
                            attempts,
                            max_retries = self.max_retries,
                            "Delivery failed, will retry: {}",
                            e
                        );
                    }
                }
            }
        }

        info!(destination = %self.destination, "Dispatch queue drained");
    }

    /// Wait until the rolling one-second window has room, polling on a fixed backoff
    async fn wait_for_slot(&self) {
        loop {
            let in_window = {
                let mut window = lock(&self.window);
                if window.has_capacity(Instant::now()) {
                    return;
                }
                window.recent_sends()
            };
            debug!(
                destination = %self.destination,
                in_window,
                backoff_ms = self.window_backoff.as_millis() as u64,
                "Send window full"
            );
            tokio::time::sleep(self.window_backoff).await;
        }
    }
}
