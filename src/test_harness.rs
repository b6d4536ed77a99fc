use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{ApiOptions, K8sApi, ModelRegistryApi};
use crate::error::FetchError;
use crate::types::{
    CreateModelArtifactData, CreateModelVersionData, CreateRegisteredModelData, ModelArtifact,
    ModelArtifactList, ModelRegistry, ModelState, ModelVersion, ModelVersionList, ModelVersionPatch,
    Namespace, RegisteredModel, RegisteredModelList, RegisteredModelPatch, UserSettings,
};

/// Let spawned invocations run to completion on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn registered_model(id: &str, name: &str) -> RegisteredModel {
    RegisteredModel {
        id: id.into(),
        name: name.into(),
        external_id: None,
        description: None,
        owner: Some("Author 1".into()),
        state: Some(ModelState::Live),
        create_time_since_epoch: "1710404288975".into(),
        last_update_time_since_epoch: "1710404288975".into(),
        custom_properties: Default::default(),
    }
}

pub fn model_version(id: &str, registered_model_id: &str) -> ModelVersion {
    ModelVersion {
        id: id.into(),
        name: format!("version-{id}"),
        registered_model_id: registered_model_id.into(),
        external_id: None,
        description: None,
        author: Some("Author 1".into()),
        state: Some(ModelState::Live),
        create_time_since_epoch: "1712234877179".into(),
        last_update_time_since_epoch: "1712234877179".into(),
        custom_properties: Default::default(),
    }
}

pub fn model_artifact(id: &str) -> ModelArtifact {
    ModelArtifact {
        id: id.into(),
        name: "test".into(),
        external_id: None,
        description: Some("Description".into()),
        uri: Some("https://huggingface.io/mnist.onnx".into()),
        state: None,
        author: Some("Author 1".into()),
        model_format_name: Some("onnx".into()),
        model_format_version: Some("1".into()),
        storage_key: Some("test storage key".into()),
        storage_path: Some("test path".into()),
        service_account_name: None,
        create_time_since_epoch: "1712234877179".into(),
        last_update_time_since_epoch: "1712234877179".into(),
        custom_properties: Default::default(),
    }
}

pub fn model_registry(name: &str) -> ModelRegistry {
    ModelRegistry {
        name: name.into(),
        display_name: name.to_uppercase(),
        description: format!("{name} registry"),
    }
}

/// In-memory [`ModelRegistryApi`] that records every call it receives.
#[derive(Default)]
pub struct MockRegistryApi {
    pub(crate) calls: Mutex<Vec<(&'static str, String)>>,
    pub registered_models: RegisteredModelList,
    pub versions: ModelVersionList,
    pub artifacts: ModelArtifactList,
    /// When set, `list_registered_models` waits for a permit before answering.
    pub hold: Option<Arc<Notify>>,
}

impl MockRegistryApi {
    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, arg: &str) {
        self.calls.lock().unwrap().push((op, arg.to_string()));
    }
}

#[async_trait]
impl ModelRegistryApi for MockRegistryApi {
    async fn create_registered_model(
        &self,
        _opts: &ApiOptions,
        data: &CreateRegisteredModelData,
    ) -> Result<RegisteredModel, FetchError> {
        self.record("create_registered_model", &data.name);
        Ok(registered_model("new", &data.name))
    }

    async fn create_model_version_for_registered_model(
        &self,
        _opts: &ApiOptions,
        registered_model_id: &str,
        data: &CreateModelVersionData,
    ) -> Result<ModelVersion, FetchError> {
        self.record("create_model_version_for_registered_model", registered_model_id);
        let mut mv = model_version("new", registered_model_id);
        mv.name = data.name.clone();
        Ok(mv)
    }

    async fn create_model_artifact_for_model_version(
        &self,
        _opts: &ApiOptions,
        model_version_id: &str,
        data: &CreateModelArtifactData,
    ) -> Result<ModelArtifact, FetchError> {
        self.record("create_model_artifact_for_model_version", model_version_id);
        let mut artifact = model_artifact("new");
        artifact.name = data.name.clone();
        Ok(artifact)
    }

    async fn get_registered_model(
        &self,
        _opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<RegisteredModel, FetchError> {
        self.record("get_registered_model", registered_model_id);
        Ok(registered_model(registered_model_id, "fetched"))
    }

    async fn get_model_version(&self, _opts: &ApiOptions, model_version_id: &str) -> Result<ModelVersion, FetchError> {
        self.record("get_model_version", model_version_id);
        Ok(model_version(model_version_id, "1"))
    }

    async fn list_registered_models(&self, _opts: &ApiOptions) -> Result<RegisteredModelList, FetchError> {
        self.record("list_registered_models", "");
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        Ok(self.registered_models.clone())
    }

    async fn get_model_versions_by_registered_model(
        &self,
        _opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<ModelVersionList, FetchError> {
        self.record("get_model_versions_by_registered_model", registered_model_id);
        Ok(self.versions.clone())
    }

    async fn get_model_artifacts_by_model_version(
        &self,
        _opts: &ApiOptions,
        model_version_id: &str,
    ) -> Result<ModelArtifactList, FetchError> {
        self.record("get_model_artifacts_by_model_version", model_version_id);
        Ok(self.artifacts.clone())
    }

    async fn patch_registered_model(
        &self,
        _opts: &ApiOptions,
        registered_model_id: &str,
        patch: &RegisteredModelPatch,
    ) -> Result<RegisteredModel, FetchError> {
        self.record("patch_registered_model", registered_model_id);
        let mut rm = registered_model(registered_model_id, "patched");
        rm.state = patch.state.or(rm.state);
        Ok(rm)
    }

    async fn patch_model_version(
        &self,
        _opts: &ApiOptions,
        model_version_id: &str,
        patch: &ModelVersionPatch,
    ) -> Result<ModelVersion, FetchError> {
        self.record("patch_model_version", model_version_id);
        let mut mv = model_version(model_version_id, "1");
        mv.state = patch.state.or(mv.state);
        Ok(mv)
    }
}

/// In-memory [`K8sApi`] whose registry list can be swapped between loads.
pub struct MockK8sApi {
    registries: Mutex<Result<Vec<ModelRegistry>, FetchError>>,
    calls: Mutex<usize>,
}

impl MockK8sApi {
    pub fn with_registries(registries: Vec<ModelRegistry>) -> Self {
        MockK8sApi {
            registries: Mutex::new(Ok(registries)),
            calls: Mutex::new(0),
        }
    }

    pub fn set_registries(&self, registries: Result<Vec<ModelRegistry>, FetchError>) {
        *self.registries.lock().unwrap() = registries;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl K8sApi for MockK8sApi {
    async fn list_model_registries(&self, _opts: &ApiOptions) -> Result<Vec<ModelRegistry>, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.registries.lock().unwrap().clone()
    }

    async fn get_user(&self, _opts: &ApiOptions) -> Result<UserSettings, FetchError> {
        *self.calls.lock().unwrap() += 1;
        Ok(UserSettings {
            user_id: "user@example.com".into(),
            cluster_admin: true,
        })
    }

    async fn get_namespaces(&self, _opts: &ApiOptions) -> Result<Vec<Namespace>, FetchError> {
        *self.calls.lock().unwrap() += 1;
        Ok(vec![Namespace { name: "kubeflow".into() }, Namespace { name: "team-a".into() }])
    }
}
