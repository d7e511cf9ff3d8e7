//! C4: the scaling decision rule with hysteresis, and the `Controller`
//! capability that turns a network snapshot into orchestrator action (or, for
//! `NullController`, into nothing but a status-endpoint render).

pub mod kube;
pub mod null;
pub mod replica_sink;

use async_trait::async_trait;

use crate::queue::QueueingNetwork;

pub use kube::KubeController;
pub use null::NullController;
pub use replica_sink::{KubeReplicaSink, ManagedDeployment, ReplicaSink, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("replica sink error: {0}")]
    Sink(#[from] SinkError),
}

/// A capability with exactly two known implementations: [`NullController`]
/// (status-only) and [`KubeController`] (status plus orchestrator patches).
#[async_trait]
pub trait Controller: Send + Sync {
    async fn stabilize(&self, network: &QueueingNetwork) -> Result<(), ControllerError>;
}

pub const UTIL_TARGET: f64 = 0.9;
pub const MAX_REPLICAS: i32 = 20;
pub const MIN_REPLICAS: i32 = 1;
pub const SCALE_UP_THRESHOLD: u32 = 0;
pub const SCALE_DOWN_THRESHOLD: u32 = 30;

/// Per-service target replica count given this tick's effective arrival rate
/// and service rate. Only the idle (`incoming_rate == 0.0`) case floors to
/// `MIN_REPLICAS`; once there is any load, `target` is cap-clamped by
/// `MAX_REPLICAS` but never floor-clamped back up to `MIN_REPLICAS`.
pub fn target_replicas(incoming_rate: f64, service_rate: f64) -> i32 {
    if incoming_rate == 0.0 {
        return MIN_REPLICAS;
    }
    let replicas = (incoming_rate / (UTIL_TARGET * service_rate)).ceil() as i32;
    replicas.min(MAX_REPLICAS)
}
