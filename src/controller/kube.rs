//! The orchestrator-patching `Controller`: runs the hysteresis decision rule
//! against a `ReplicaSink` and republishes the DOT rendering on every tick.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::controller::replica_sink::{ManagedDeployment, ReplicaSink};
use crate::controller::{Controller, ControllerError, SCALE_DOWN_THRESHOLD, SCALE_UP_THRESHOLD, target_replicas};
use crate::queue::QueueingNetwork;
use crate::status::DotPublisher;

pub struct KubeController {
    sink: Arc<dyn ReplicaSink>,
    managed: Mutex<HashMap<String, ManagedDeployment>>,
    publisher: DotPublisher,
}

impl KubeController {
    /// Builds the managed set once, from the sink's current listing.
    pub async fn new(
        sink: Arc<dyn ReplicaSink>,
        publisher: DotPublisher,
    ) -> Result<Self, ControllerError> {
        let managed = sink
            .list_managed()
            .await?
            .into_iter()
            .map(|deploy| (deploy.name.clone(), deploy))
            .collect();

        info!("kube controller managing {} workloads", managed.len());

        Ok(Self {
            sink,
            managed: Mutex::new(managed),
            publisher,
        })
    }
}

#[async_trait]
impl Controller for KubeController {
    async fn stabilize(&self, network: &QueueingNetwork) -> Result<(), ControllerError> {
        self.publisher.store(Arc::new(network.to_dot()));

        let incoming_rates = network.incoming_rates();
        let mut managed = self.managed.lock().await;

        for (service, deploy) in managed.iter_mut() {
            let Some(metric) = network.metric(service) else {
                continue;
            };
            let rate = incoming_rates.get(service).copied().unwrap_or(0.0);
            let target = target_replicas(rate, metric.service_rate());

            if target == deploy.replicas {
                deploy.up_streak = 0;
                deploy.down_streak = 0;
            } else if target < deploy.replicas && deploy.down_streak < SCALE_DOWN_THRESHOLD {
                deploy.down_streak += 1;
            } else if target > deploy.replicas && deploy.up_streak < SCALE_UP_THRESHOLD {
                deploy.up_streak += 1;
            } else {
                match self.sink.apply_replicas(service, target).await {
                    Ok(confirmed) => {
                        info!(
                            "changed replicas for service '{service}': {} -> {confirmed}",
                            deploy.replicas
                        );
                        deploy.replicas = confirmed;
                        deploy.up_streak = 0;
                        deploy.down_streak = 0;
                    }
                    Err(err) => {
                        warn!("failed to patch replicas for '{service}': {err}");
                        return Err(err.into());
                    }
                }
            }
        }

        Ok(())
    }
}
