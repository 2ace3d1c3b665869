//! Payout Watch Library
//!
//! Polls watched contracts for new transactions, groups them into payout
//! bursts, classifies the value pattern and sends rate-limited Telegram alerts.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod monitor;
pub mod pattern;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
