//! Capability traits for the remote registry and cluster APIs.
//!
//! Each method maps to exactly one remote operation. Implementations live in
//! [`rest`]; tests substitute their own.

pub mod rest;

use crate::error::FetchError;
use crate::types::{
    CreateModelArtifactData, CreateModelVersionData, CreateRegisteredModelData, ModelArtifact,
    ModelArtifactList, ModelRegistry, ModelVersion, ModelVersionList, ModelVersionPatch, Namespace,
    RegisteredModel, RegisteredModelList, RegisteredModelPatch, UserSettings,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use rest::{k8s_factory, model_registry_factory, K8sRestApi, ModelRegistryRestApi, RestClient};

/// Per-call options handed to every remote operation.
#[derive(Clone, Debug, Default)]
pub struct ApiOptions {
    /// Cancelled when the invocation is superseded; transports abort the request.
    pub cancel: CancellationToken,
}

impl ApiOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        ApiOptions { cancel }
    }
}

/// Operations of one model registry instance.
#[async_trait]
pub trait ModelRegistryApi: Send + Sync {
    async fn create_registered_model(
        &self,
        opts: &ApiOptions,
        data: &CreateRegisteredModelData,
    ) -> Result<RegisteredModel, FetchError>;

    async fn create_model_version_for_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
        data: &CreateModelVersionData,
    ) -> Result<ModelVersion, FetchError>;

    async fn create_model_artifact_for_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
        data: &CreateModelArtifactData,
    ) -> Result<ModelArtifact, FetchError>;

    async fn get_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<RegisteredModel, FetchError>;

    async fn get_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
    ) -> Result<ModelVersion, FetchError>;

    async fn list_registered_models(&self, opts: &ApiOptions) -> Result<RegisteredModelList, FetchError>;

    async fn get_model_versions_by_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<ModelVersionList, FetchError>;

    async fn get_model_artifacts_by_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
    ) -> Result<ModelArtifactList, FetchError>;

    async fn patch_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
        patch: &RegisteredModelPatch,
    ) -> Result<RegisteredModel, FetchError>;

    async fn patch_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
        patch: &ModelVersionPatch,
    ) -> Result<ModelVersion, FetchError>;
}

/// Cluster-level operations: which registries, namespaces and user exist.
#[async_trait]
pub trait K8sApi: Send + Sync {
    async fn list_model_registries(&self, opts: &ApiOptions) -> Result<Vec<ModelRegistry>, FetchError>;

    async fn get_user(&self, opts: &ApiOptions) -> Result<UserSettings, FetchError>;

    async fn get_namespaces(&self, opts: &ApiOptions) -> Result<Vec<Namespace>, FetchError>;
}
