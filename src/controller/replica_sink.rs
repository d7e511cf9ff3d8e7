//! A2 / the `ReplicaSink` capability: enumerate managed workloads and patch
//! their replica counts against the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};

const NUM_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("patch serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("deployment '{0}' has no spec.replicas set")]
    MissingReplicas(String),
    #[error("max conflict retries exceeded patching '{0}'")]
    MaxConflictRetriesExceeded(String),
}

/// A workload the controller may scale, with the last API-confirmed replica
/// count and the hysteresis streaks gating scale direction.
#[derive(Debug, Clone)]
pub struct ManagedDeployment {
    pub name: String,
    pub replicas: i32,
    pub up_streak: u32,
    pub down_streak: u32,
}

/// Read/patch replica counts against whatever cluster orchestrator backs a
/// workload. The controller's decision rule is agnostic to the concrete
/// protocol; only `KubeReplicaSink` is shipped here.
#[async_trait]
pub trait ReplicaSink: Send + Sync {
    /// Enumerate workloads eligible for scaling, excluding any carrying the
    /// opt-out annotation. Computed once, at startup.
    async fn list_managed(&self) -> Result<Vec<ManagedDeployment>, SinkError>;

    /// Patch a workload's replica count and return the API-confirmed value,
    /// which may differ from `target` if another actor raced the same
    /// resource.
    async fn apply_replicas(&self, service: &str, target: i32) -> Result<i32, SinkError>;
}

pub struct KubeReplicaSink {
    api: Api<Deployment>,
    opt_out_key: String,
    opt_out_value: String,
}

impl KubeReplicaSink {
    pub fn new(client: kube::Client, namespace: &str, opt_out_key: &str, opt_out_value: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            opt_out_key: opt_out_key.to_string(),
            opt_out_value: opt_out_value.to_string(),
        }
    }

    fn is_opted_out(&self, deploy: &Deployment) -> bool {
        deploy
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&self.opt_out_key))
            .is_some_and(|value| value == &self.opt_out_value)
    }
}

#[async_trait]
impl ReplicaSink for KubeReplicaSink {
    async fn list_managed(&self) -> Result<Vec<ManagedDeployment>, SinkError> {
        let deployments = self.api.list(&Default::default()).await?;

        let mut managed = Vec::with_capacity(deployments.items.len());
        for deploy in deployments.items {
            if self.is_opted_out(&deploy) {
                continue;
            }
            let name = deploy
                .metadata
                .name
                .clone()
                .ok_or_else(|| SinkError::MissingReplicas("<unnamed>".to_string()))?;
            let replicas = deploy
                .spec
                .as_ref()
                .and_then(|spec| spec.replicas)
                .ok_or_else(|| SinkError::MissingReplicas(name.clone()))?;

            managed.push(ManagedDeployment {
                name,
                replicas,
                up_streak: 0,
                down_streak: 0,
            });
        }
        Ok(managed)
    }

    async fn apply_replicas(&self, service: &str, target: i32) -> Result<i32, SinkError> {
        let patch = serde_json::json!({ "spec": { "replicas": target } });

        for attempt in 0..NUM_CONFLICT_RETRIES {
            match self
                .api
                .patch(service, &PatchParams::default(), &Patch::Strategic(&patch))
                .await
            {
                Ok(updated) => {
                    return updated
                        .spec
                        .and_then(|spec| spec.replicas)
                        .ok_or_else(|| SinkError::MissingReplicas(service.to_string()));
                }
                Err(kube::Error::Api(api_error)) if api_error.code == 409 => {
                    if attempt + 1 < NUM_CONFLICT_RETRIES {
                        continue;
                    }
                    return Err(SinkError::MaxConflictRetriesExceeded(service.to_string()));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(SinkError::MaxConflictRetriesExceeded(service.to_string()))
    }
}
