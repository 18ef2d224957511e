// Module declarations
mod aggregator;
mod counters;

// Public API exports
pub use aggregator::BadgeAggregator;
pub use counters::{BadgeChannel, BadgeCounters, BadgeCounts};
