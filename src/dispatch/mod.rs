//! Outbound alert delivery
//!
//! Each destination gets its own [`Dispatcher`]: a FIFO queue drained by a
//! single in-flight task under a rolling send-rate ceiling.

pub mod dispatcher;
pub mod split;
pub mod telegram;
pub mod window;

use async_trait::async_trait;

use crate::error::Result;

pub use dispatcher::{DispatchStats, Dispatcher, QueuedMessage};
pub use split::split_message;
pub use telegram::TelegramSink;
pub use window::SendWindow;

/// Chat delivery endpoint
///
/// Implementations return `Error::RateLimited` when the provider throttles
/// the bot and any other error for failures that count against the retry budget.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> Result<()>;
}
