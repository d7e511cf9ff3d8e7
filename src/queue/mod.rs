//! C1 (rate estimation), the per-service service-rate metric, and C2 (the
//! queueing-network graph plus its DOT rendering and rate back-propagation).

pub mod metric;
pub mod network;
pub mod rate_estimator;

pub use metric::QueueMetric;
pub use network::QueueingNetwork;
pub use rate_estimator::RateEstimator;
