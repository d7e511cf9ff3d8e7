//! C3: buffers spans by trace id, detects completed traces, folds them into
//! the queueing network, and drives the periodic update/decision cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::model::Span;
use crate::queue::QueueingNetwork;

type Trace = HashMap<String, Span>;

fn trace_complete(trace: &Trace) -> bool {
    trace
        .values()
        .all(|span| span.is_root() || trace.contains_key(&span.parent_span_id))
}

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Owns the sole mutable `QueueingNetwork` and the buffer of in-flight
/// traces. Nothing else is permitted to mutate either.
pub struct TraceAssembler {
    network: QueueingNetwork,
    controller: Arc<dyn Controller>,
    buffer: HashMap<String, Trace>,
    interval: Duration,
}

impl TraceAssembler {
    pub fn new(controller: Arc<dyn Controller>, interval: Duration) -> Self {
        Self {
            network: QueueingNetwork::new(),
            controller,
            buffer: HashMap::new(),
            interval,
        }
    }

    /// Places an incoming span into its trace's buffer. Spans with an empty
    /// service name are dropped. Last-writer-wins on a duplicate span id.
    fn ingest(&mut self, span: Span) {
        if span.service_name.is_empty() {
            return;
        }
        self.buffer
            .entry(span.trace_id.clone())
            .or_default()
            .insert(span.span_id.clone(), span);
    }

    /// Folds every complete trace into the network and removes it from the
    /// buffer; incomplete traces are left for a later tick.
    fn flush(&mut self) {
        let complete: Vec<String> = self
            .buffer
            .iter()
            .filter(|(_, trace)| trace_complete(trace))
            .map(|(id, _)| id.clone())
            .collect();

        for trace_id in complete {
            let Some(trace) = self.buffer.remove(&trace_id) else {
                continue;
            };
            for span in trace.values() {
                if span.is_root() {
                    self.network.add_external_request(span);
                } else if let Some(parent) = trace.get(&span.parent_span_id) {
                    self.network.add_internal_request(parent, span);
                }
            }
        }
    }

    async fn tick(&mut self) {
        self.flush();
        self.network.update_estimates(self.interval.as_secs_f64());
        if let Err(err) = self.controller.stabilize(&self.network).await {
            warn!("controller failed to stabilize: {err}");
        }
    }

    /// The assembler's cooperative loop: spans, ticks, and cancellation are
    /// the only three event sources, consumed by one multiplexed wait.
    pub async fn run(mut self, mut spans: mpsc::Receiver<Span>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_span = spans.recv() => {
                    match maybe_span {
                        Some(span) => self.ingest(span),
                        None => {
                            info!("trace source closed, shutting down assembler");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                () = cancel.cancelled() => {
                    info!("assembler cancelled, shutting down");
                    return;
                }
            }
        }
    }
}
