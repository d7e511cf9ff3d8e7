//! The span record that flows from trace ingestion into the queueing network.

/// One service's record of handling a single request, with a causal link to
/// its caller's span. Decoded from OTLP by [`crate::otlp`].
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// Empty string means this span is a trace root.
    pub parent_span_id: String,
    pub service_name: String,
    pub start_time: u64,
    pub duration: u64,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }
}
