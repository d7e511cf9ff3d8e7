//! A4: process configuration. CLI flags with environment-variable fallback,
//! mirroring the listen-address/interval constants the distilled design
//! otherwise hard-codes.

use std::time::Duration;

use clap::{Parser, ValueEnum};

pub const DEFAULT_GRPC_ADDR: &str = "0.0.0.0:4317";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_KUBE_NAMESPACE: &str = "default";
pub const DEFAULT_ANNOTATION_KEY: &str = "queue-scaler";
pub const DEFAULT_ANNOTATION_VALUE: &str = "no-scale";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControllerMode {
    /// Status-only: render the graph, never patch replica counts.
    StatusOnly,
    /// Patch replica counts against the Kubernetes API.
    Kubernetes,
}

#[derive(Parser, Debug)]
#[command(name = "queue-scaler", about = "Trace-driven autoscaling controller")]
pub struct AppConfig {
    /// Address the OTLP gRPC ingestion server binds.
    #[arg(long, env = "QUEUE_SCALER_GRPC_ADDR", default_value = DEFAULT_GRPC_ADDR)]
    pub grpc_addr: String,

    /// Address the HTTP status endpoint binds.
    #[arg(long, env = "QUEUE_SCALER_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: String,

    /// Seconds between update/decision ticks.
    #[arg(long, env = "QUEUE_SCALER_TICK_INTERVAL_SECS", default_value_t = DEFAULT_TICK_INTERVAL_SECS)]
    pub tick_interval_secs: u64,

    /// Structured-log output format.
    #[arg(long, value_enum, env = "QUEUE_SCALER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Whether to actually patch replicas, or just render status.
    #[arg(long, value_enum, env = "QUEUE_SCALER_CONTROLLER_MODE", default_value = "kubernetes")]
    pub controller_mode: ControllerMode,

    /// Kubernetes namespace holding the managed workloads.
    #[arg(long, env = "QUEUE_SCALER_KUBE_NAMESPACE", default_value = DEFAULT_KUBE_NAMESPACE)]
    pub kube_namespace: String,

    /// Annotation key that opts a workload out of scaling.
    #[arg(long, env = "QUEUE_SCALER_ANNOTATION_KEY", default_value = DEFAULT_ANNOTATION_KEY)]
    pub annotation_key: String,

    /// Annotation value that opts a workload out of scaling.
    #[arg(long, env = "QUEUE_SCALER_ANNOTATION_VALUE", default_value = DEFAULT_ANNOTATION_VALUE)]
    pub annotation_value: String,
}

impl AppConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
