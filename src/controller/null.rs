//! The status-only `Controller`: no orchestrator side effects, just a
//! re-render of the current network into the shared DOT publisher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::controller::{Controller, ControllerError};
use crate::queue::QueueingNetwork;
use crate::status::DotPublisher;

pub struct NullController {
    publisher: Option<DotPublisher>,
}

impl NullController {
    pub fn new() -> Self {
        Self { publisher: None }
    }

    pub fn with_publisher(publisher: DotPublisher) -> Self {
        Self {
            publisher: Some(publisher),
        }
    }
}

impl Default for NullController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Controller for NullController {
    async fn stabilize(&self, network: &QueueingNetwork) -> Result<(), ControllerError> {
        if let Some(publisher) = &self.publisher {
            publisher.store(Arc::new(network.to_dot()));
        }
        Ok(())
    }
}
