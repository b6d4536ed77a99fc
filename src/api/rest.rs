//! REST transport: one HTTP request per remote operation.

use crate::api::{ApiOptions, K8sApi, ModelRegistryApi};
use crate::config::{ConsoleConfig, ENV_BFF_URL};
use crate::error::{ConfigError, ErrorBody, FetchError};
use crate::response::parse_envelope;
use crate::scope::Scope;
use crate::types::{
    CreateModelArtifactData, CreateModelVersionData, CreateRegisteredModelData, ModelArtifact,
    ModelArtifactList, ModelRegistry, ModelVersion, ModelVersionList, ModelVersionPatch, Namespace,
    RegisteredModel, RegisteredModelList, RegisteredModelPatch, UserSettings,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Request bodies travel in the same `{ "data": ... }` envelope as responses.
#[derive(Serialize)]
struct RequestBody<'a, B: ?Sized> {
    data: &'a B,
}

/// HTTP client bound to one BFF and one scope.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    api_version: String,
    scope: Scope,
}

impl RestClient {
    pub fn new(config: &ConsoleConfig) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Invalid {
            key: ENV_BFF_URL,
            value: config.bff_url.clone(),
        };
        let base = Url::parse(&config.bff_url).map_err(|_| invalid())?;
        if base.cannot_be_a_base() {
            return Err(invalid());
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(RestClient {
            http,
            base,
            api_version: config.api_version.clone(),
            scope: config.scope.clone(),
        })
    }

    /// Same client, requests sent to `scope`.
    pub fn scoped(&self, scope: &Scope) -> Self {
        RestClient {
            scope: scope.clone(),
            ..self.clone()
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `{base}/api/{version}/{segments...}?namespace={ns}`; segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("api")
                .push(&self.api_version)
                .extend(segments);
        }
        if let Some(ns) = self.scope.namespace() {
            url.query_pairs_mut().append_pair("namespace", ns);
        }
        url
    }

    pub async fn get<T: DeserializeOwned>(&self, opts: &ApiOptions, segments: &[&str]) -> Result<T, FetchError> {
        let url = self.endpoint(segments);
        tracing::debug!(method = "GET", url = %url, "request");
        self.send(opts, self.http.get(url)).await
    }

    pub async fn create<B, T>(&self, opts: &ApiOptions, segments: &[&str], body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        tracing::debug!(method = "POST", url = %url, "request");
        self.send(opts, self.http.post(url).json(&RequestBody { data: body })).await
    }

    pub async fn patch<B, T>(&self, opts: &ApiOptions, segments: &[&str], body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        tracing::debug!(method = "PATCH", url = %url, "request");
        self.send(opts, self.http.patch(url).json(&RequestBody { data: body })).await
    }

    async fn send<T: DeserializeOwned>(&self, opts: &ApiOptions, request: RequestBuilder) -> Result<T, FetchError> {
        let call = async {
            let response = request.send().await?;
            handle_rest_failures(response).await
        };
        tokio::select! {
            result = call => result,
            _ = opts.cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }
}

/// Turn non-2xx responses into [`FetchError::Remote`], then unwrap the envelope.
async fn handle_rest_failures<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        let err = match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error_body) => error_body.into_fetch_error(status.as_u16()),
            Err(_) => FetchError::Remote {
                status: status.as_u16(),
                code: "http_error".into(),
                message: match String::from_utf8_lossy(&body).trim() {
                    "" => status.to_string(),
                    text => text.to_string(),
                },
            },
        };
        tracing::debug!(status = status.as_u16(), error = %err, "request failed");
        return Err(err);
    }
    parse_envelope(&body)
}

/// Cluster-level API: registries, namespaces, current user.
#[derive(Clone, Debug)]
pub struct K8sRestApi {
    client: RestClient,
}

impl K8sRestApi {
    pub fn new(client: RestClient) -> Self {
        K8sRestApi { client }
    }
}

#[async_trait]
impl K8sApi for K8sRestApi {
    async fn list_model_registries(&self, opts: &ApiOptions) -> Result<Vec<ModelRegistry>, FetchError> {
        self.client.get(opts, &["model_registry"]).await
    }

    async fn get_user(&self, opts: &ApiOptions) -> Result<UserSettings, FetchError> {
        self.client.get(opts, &["user"]).await
    }

    async fn get_namespaces(&self, opts: &ApiOptions) -> Result<Vec<Namespace>, FetchError> {
        self.client.get(opts, &["namespaces"]).await
    }
}

/// API of one model registry instance, addressed by name under `/model_registry/{name}`.
#[derive(Clone, Debug)]
pub struct ModelRegistryRestApi {
    client: RestClient,
    model_registry: String,
}

impl ModelRegistryRestApi {
    pub fn new(client: RestClient, model_registry: impl Into<String>) -> Self {
        ModelRegistryRestApi {
            client,
            model_registry: model_registry.into(),
        }
    }

    pub fn model_registry(&self) -> &str {
        &self.model_registry
    }

    fn path<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut segments = vec!["model_registry", self.model_registry.as_str()];
        segments.extend_from_slice(rest);
        segments
    }
}

#[async_trait]
impl ModelRegistryApi for ModelRegistryRestApi {
    async fn create_registered_model(
        &self,
        opts: &ApiOptions,
        data: &CreateRegisteredModelData,
    ) -> Result<RegisteredModel, FetchError> {
        self.client.create(opts, &self.path(&["registered_models"]), data).await
    }

    async fn create_model_version_for_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
        data: &CreateModelVersionData,
    ) -> Result<ModelVersion, FetchError> {
        let segments = self.path(&["registered_models", registered_model_id, "versions"]);
        self.client.create(opts, &segments, data).await
    }

    async fn create_model_artifact_for_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
        data: &CreateModelArtifactData,
    ) -> Result<ModelArtifact, FetchError> {
        let segments = self.path(&["model_versions", model_version_id, "artifacts"]);
        self.client.create(opts, &segments, data).await
    }

    async fn get_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<RegisteredModel, FetchError> {
        let segments = self.path(&["registered_models", registered_model_id]);
        self.client.get(opts, &segments).await
    }

    async fn get_model_version(&self, opts: &ApiOptions, model_version_id: &str) -> Result<ModelVersion, FetchError> {
        let segments = self.path(&["model_versions", model_version_id]);
        self.client.get(opts, &segments).await
    }

    async fn list_registered_models(&self, opts: &ApiOptions) -> Result<RegisteredModelList, FetchError> {
        self.client.get(opts, &self.path(&["registered_models"])).await
    }

    async fn get_model_versions_by_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
    ) -> Result<ModelVersionList, FetchError> {
        let segments = self.path(&["registered_models", registered_model_id, "versions"]);
        self.client.get(opts, &segments).await
    }

    async fn get_model_artifacts_by_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
    ) -> Result<ModelArtifactList, FetchError> {
        let segments = self.path(&["model_versions", model_version_id, "artifacts"]);
        self.client.get(opts, &segments).await
    }

    async fn patch_registered_model(
        &self,
        opts: &ApiOptions,
        registered_model_id: &str,
        patch: &RegisteredModelPatch,
    ) -> Result<RegisteredModel, FetchError> {
        let segments = self.path(&["registered_models", registered_model_id]);
        self.client.patch(opts, &segments, patch).await
    }

    async fn patch_model_version(
        &self,
        opts: &ApiOptions,
        model_version_id: &str,
        patch: &ModelVersionPatch,
    ) -> Result<ModelVersion, FetchError> {
        let segments = self.path(&["model_versions", model_version_id]);
        self.client.patch(opts, &segments, patch).await
    }
}

/// Gate factory for the cluster-level API, rebuilt for every scope change.
pub fn k8s_factory(client: RestClient) -> impl Fn(&Scope) -> Result<Arc<dyn K8sApi>, FetchError> + Send + Sync {
    move |scope: &Scope| {
        let api: Arc<dyn K8sApi> = Arc::new(K8sRestApi::new(client.scoped(scope)));
        Ok(api)
    }
}

pub const NO_MODEL_REGISTRY_SELECTED: &str = "No model registry selected";

/// Gate factory for one registry. Without a registry name the gate stays
/// unavailable.
pub fn model_registry_factory(
    client: RestClient,
    model_registry: Option<String>,
) -> impl Fn(&Scope) -> Result<Arc<dyn ModelRegistryApi>, FetchError> + Send + Sync {
    move |scope: &Scope| {
        let name = model_registry
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FetchError::not_ready(NO_MODEL_REGISTRY_SELECTED))?;
        let api: Arc<dyn ModelRegistryApi> = Arc::new(ModelRegistryRestApi::new(client.scoped(scope), name));
        Ok(api)
    }
}
