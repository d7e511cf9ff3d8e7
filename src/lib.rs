//! Trace-driven autoscaling controller.
//!
//! Consumes OTLP trace export requests, reconstructs the inter-service call
//! graph as a queueing-network approximation, and drives a Kubernetes
//! `Deployment`'s replica count so utilization stays below a configured
//! safety margin.

pub mod assembler;
pub mod config;
pub mod controller;
pub mod logging;
pub mod model;
pub mod otlp;
pub mod queue;
pub mod status;
