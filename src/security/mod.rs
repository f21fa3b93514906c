//! Flood and abuse controls.

pub mod flood;
pub mod ratelimit;

pub use flood::{FloodCounter, FloodSettings, FloodVerdict};
pub use ratelimit::RateLimitManager;
