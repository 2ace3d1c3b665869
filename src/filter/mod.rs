//! Alert filtering
//!
//! - `reputation`: veto for groups whose recipients already have history with the contract
//! - `throttle`: shared call budget for the reputation lookups

pub mod reputation;
pub mod throttle;

pub use reputation::ReputationFilter;
pub use throttle::CallThrottle;
