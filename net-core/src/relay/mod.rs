//! Dedup, rate-limiting, bandwidth-capping and priority relay of gossiped
//! messages (spec §4.8–§4.12).

pub mod bandwidth;
pub mod priority_queue;
pub mod rate_limiter;
pub mod relay_engine;
pub mod tracker;

pub use bandwidth::BandwidthMonitor;
pub use priority_queue::{PriorityMessageQueue, QueuedMessage};
pub use rate_limiter::RateLimiter;
pub use relay_engine::{MessageRelay, RelayStats};
pub use tracker::MessageTracker;
