//! Per-service accumulated duration/count and the derived service rate.

/// Monotonic per-service accumulators. Never reset for the life of the process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetric {
    duration_sum: u64,
    request_count: u64,
}

impl QueueMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration_nanos: u64) {
        self.duration_sum += duration_nanos;
        self.request_count += 1;
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    #[cfg(test)]
    pub(crate) fn from_raw(duration_sum: u64, request_count: u64) -> Self {
        Self {
            duration_sum,
            request_count,
        }
    }

    /// μ = request_count / (duration_sum · 1e-9); 0 when no requests recorded.
    pub fn service_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        1.0 / ((self.duration_sum as f64 / 1e9) / self.request_count as f64)
    }
}
