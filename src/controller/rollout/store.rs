use crate::crd::rollout::{Rollout, ROLLOUT_NAME_LABEL};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl StoreError {
    fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict {
                kind,
                name: name.to_string(),
            },
            other => StoreError::Api(other),
        }
    }
}

/// Object storage used by the reconciler
///
/// Reads feed the planner's snapshot, writes apply its operations. All patches are
/// JSON merge patches and carry the resourceVersion they were computed against.
#[async_trait]
pub trait RolloutStore: Send + Sync {
    /// ReplicaSets labelled as belonging to the named rollout
    async fn list_replica_sets(
        &self,
        namespace: &str,
        rollout: &str,
    ) -> Result<Vec<ReplicaSet>, StoreError>;

    /// `None` when the Service does not exist
    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, StoreError>;

    async fn create_replica_set(
        &self,
        namespace: &str,
        rs: &ReplicaSet,
    ) -> Result<ReplicaSet, StoreError>;

    async fn patch_replica_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError>;

    /// Delete, optionally only if the object still has `uid`
    async fn delete_replica_set(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError>;

    async fn patch_rollout_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError>;
}

/// Store backed by the Kubernetes API server
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        KubeStore { client }
    }
}

#[async_trait]
impl RolloutStore for KubeStore {
    async fn list_replica_sets(
        &self,
        namespace: &str,
        rollout: &str,
    ) -> Result<Vec<ReplicaSet>, StoreError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{ROLLOUT_NAME_LABEL}={rollout}"));
        Ok(api.list(&params).await?.items)
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_replica_set(
        &self,
        namespace: &str,
        rs: &ReplicaSet,
    ) -> Result<ReplicaSet, StoreError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let name = rs.metadata.name.clone().unwrap_or_default();
        api.create(&PostParams::default(), rs)
            .await
            .map_err(|e| StoreError::from_kube(e, "ReplicaSet", &name))
    }

    async fn patch_replica_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, "ReplicaSet", name))?;
        Ok(())
    }

    async fn delete_replica_set(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<(), StoreError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            preconditions: uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };
        api.delete(name, &params)
            .await
            .map_err(|e| StoreError::from_kube(e, "ReplicaSet", name))?;
        Ok(())
    }

    async fn patch_service(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, "Service", name))?;
        Ok(())
    }

    async fn patch_rollout_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError> {
        let api: Api<Rollout> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, "Rollout", name))?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
