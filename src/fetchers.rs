//! Derived fetchers: a fetch-state controller bound to a readiness gate and one
//! remote operation.
//!
//! A [`GatedFetcher`] follows its gate and its input. Whenever either changes
//! it redeclares the producer with dependencies `(gate generation, availability,
//! input)`, which starts a new invocation. Producers fail with NotReady before
//! touching the network when the gate is unavailable or an id is missing.

use crate::api::{K8sApi, ModelRegistryApi};
use crate::error::FetchError;
use crate::fetch_state::{producer, rejected, FetchOptions, FetchState, FetchStateController, Producer};
use crate::gate::{ApiGate, ApiSnapshot, GateKey};
use crate::types::{
    ModelArtifactList, ModelRegistry, ModelVersion, ModelVersionList, Namespace, RegisteredModel,
    RegisteredModelList, UserSettings,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const NO_REGISTERED_MODEL_ID: &str = "No registeredModel id";
pub const NO_MODEL_VERSION_ID: &str = "No model version id";
/// Message used by the artifacts-by-version fetcher when its version id is missing.
pub const NO_ARTIFACTS_VERSION_ID: &str = "No model registeredModel id";

/// Builds the producer for one gate snapshot and input.
pub type BuildProducer<A, I, T> = fn(&ApiSnapshot<A>, &I) -> Producer<T>;

#[derive(Clone, Debug, PartialEq)]
pub struct GatedDeps<I> {
    pub gate: GateKey,
    pub input: I,
}

pub struct GatedFetcher<T, I = ()> {
    controller: Arc<FetchStateController<T, GatedDeps<I>>>,
    input: watch::Sender<I>,
    follower: JoinHandle<()>,
}

impl<T, I> GatedFetcher<T, I>
where
    T: Send + Sync + 'static,
    I: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start fetching immediately. Must be called inside a tokio runtime.
    pub fn new<A>(
        gate: &ApiGate<A>,
        input: I,
        default: T,
        options: FetchOptions,
        build: BuildProducer<A, I, T>,
    ) -> Self
    where
        A: ?Sized + Send + Sync + 'static,
    {
        let controller = Arc::new(FetchStateController::new(default, options));
        let (input_tx, mut input_rx) = watch::channel(input);
        let mut gate_rx = gate.subscribe();

        let snapshot = gate_rx.borrow_and_update().clone();
        let current = input_rx.borrow_and_update().clone();
        redeclare(&controller, &gate_rx, snapshot, current, build);

        let weak = Arc::downgrade(&controller);
        let follower = tokio::spawn(async move {
            // A dropped gate keeps its last snapshot; input changes are still followed.
            let mut gate_open = true;
            loop {
                tokio::select! {
                    changed = gate_rx.changed(), if gate_open => {
                        if changed.is_err() {
                            tracing::debug!("api gate dropped, following input only");
                            gate_open = false;
                            continue;
                        }
                    }
                    changed = input_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                let snapshot = gate_rx.borrow_and_update().clone();
                let current = input_rx.borrow_and_update().clone();
                redeclare(&controller, &gate_rx, snapshot, current, build);
            }
        });

        GatedFetcher {
            controller,
            input: input_tx,
            follower,
        }
    }

    /// Change the required input (e.g. a parent id). No-op when unchanged.
    pub fn set_input(&self, input: I) {
        self.input.send_if_modified(|current| {
            if *current == input {
                return false;
            }
            *current = input;
            true
        });
    }

    pub fn refresh(&self) -> Option<u64> {
        self.controller.refresh()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.controller.latest_sequence()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.controller.subscribe()
    }

    pub fn snapshot(&self) -> FetchState<T>
    where
        T: Clone,
    {
        self.controller.snapshot()
    }
}

impl<T, I> Drop for GatedFetcher<T, I> {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

fn redeclare<A, I, T>(
    controller: &FetchStateController<T, GatedDeps<I>>,
    gate_rx: &watch::Receiver<ApiSnapshot<A>>,
    snapshot: ApiSnapshot<A>,
    input: I,
    build: BuildProducer<A, I, T>,
) where
    A: ?Sized + Send + Sync + 'static,
    I: Clone + PartialEq + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    let deps = GatedDeps {
        gate: snapshot.key(),
        input,
    };
    let inner = build(&snapshot, &deps.input);
    let p = invalidate_on_rebuild(inner, gate_rx.clone(), snapshot.generation());
    controller.set_producer(deps, p);
}

/// Never start or resolve once the gate has moved past `generation`: the
/// capability the producer was built on no longer exists. The follower then
/// supersedes (and cancels) the invocation.
fn invalidate_on_rebuild<A, T>(
    inner: Producer<T>,
    gate_rx: watch::Receiver<ApiSnapshot<A>>,
    generation: u64,
) -> Producer<T>
where
    A: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
{
    producer(move |opts| {
        let inner = inner.clone();
        let mut gate_rx = gate_rx.clone();
        async move {
            let stale = gate_rx.borrow().generation() != generation;
            if stale {
                tracing::debug!(generation = generation, "api rebuilt before request started");
                return std::future::pending().await;
            }
            let mut fut = inner(opts);
            let rebuilt = tokio::select! {
                biased;
                rebuilt = wait_rebuilt(&mut gate_rx, generation) => rebuilt,
                result = &mut fut => return result,
            };
            if !rebuilt {
                return fut.await;
            }
            tracing::debug!(generation = generation, "api rebuilt while request in flight");
            std::future::pending().await
        }
    })
}

async fn wait_rebuilt<A: ?Sized>(rx: &mut watch::Receiver<ApiSnapshot<A>>, generation: u64) -> bool {
    rx.wait_for(|s| s.generation() != generation).await.is_ok()
}

fn required_id(id: &Option<String>, message: &str) -> Result<String, FetchError> {
    id.clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FetchError::not_ready(message))
}

// Producer builders, one remote call each.

pub fn list_registered_models_producer(
    snapshot: &ApiSnapshot<dyn ModelRegistryApi>,
    _input: &(),
) -> Producer<RegisteredModelList> {
    let api = match snapshot.require() {
        Ok(api) => api,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let api = api.clone();
        async move { api.list_registered_models(&opts).await }
    })
}

pub fn registered_model_producer(
    snapshot: &ApiSnapshot<dyn ModelRegistryApi>,
    id: &Option<String>,
) -> Producer<Option<RegisteredModel>> {
    let (api, id) = match snapshot
        .require()
        .and_then(|api| required_id(id, NO_REGISTERED_MODEL_ID).map(|id| (api, id)))
    {
        Ok(pair) => pair,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let (api, id) = (api.clone(), id.clone());
        async move { api.get_registered_model(&opts, &id).await.map(Some) }
    })
}

pub fn model_versions_by_registered_model_producer(
    snapshot: &ApiSnapshot<dyn ModelRegistryApi>,
    id: &Option<String>,
) -> Producer<ModelVersionList> {
    let (api, id) = match snapshot
        .require()
        .and_then(|api| required_id(id, NO_REGISTERED_MODEL_ID).map(|id| (api, id)))
    {
        Ok(pair) => pair,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let (api, id) = (api.clone(), id.clone());
        async move { api.get_model_versions_by_registered_model(&opts, &id).await }
    })
}

pub fn model_version_producer(
    snapshot: &ApiSnapshot<dyn ModelRegistryApi>,
    id: &Option<String>,
) -> Producer<Option<ModelVersion>> {
    let (api, id) = match snapshot
        .require()
        .and_then(|api| required_id(id, NO_MODEL_VERSION_ID).map(|id| (api, id)))
    {
        Ok(pair) => pair,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let (api, id) = (api.clone(), id.clone());
        async move { api.get_model_version(&opts, &id).await.map(Some) }
    })
}

pub fn model_artifacts_by_version_id_producer(
    snapshot: &ApiSnapshot<dyn ModelRegistryApi>,
    id: &Option<String>,
) -> Producer<ModelArtifactList> {
    let (api, id) = match snapshot
        .require()
        .and_then(|api| required_id(id, NO_ARTIFACTS_VERSION_ID).map(|id| (api, id)))
    {
        Ok(pair) => pair,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let (api, id) = (api.clone(), id.clone());
        async move { api.get_model_artifacts_by_model_version(&opts, &id).await }
    })
}

pub fn model_registries_producer(snapshot: &ApiSnapshot<dyn K8sApi>, _input: &()) -> Producer<Vec<ModelRegistry>> {
    let api = match snapshot.require() {
        Ok(api) => api,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let api = api.clone();
        async move { api.list_model_registries(&opts).await }
    })
}

pub fn namespaces_producer(snapshot: &ApiSnapshot<dyn K8sApi>, _input: &()) -> Producer<Vec<Namespace>> {
    let api = match snapshot.require() {
        Ok(api) => api,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let api = api.clone();
        async move { api.get_namespaces(&opts).await }
    })
}

pub fn user_producer(snapshot: &ApiSnapshot<dyn K8sApi>, _input: &()) -> Producer<Option<UserSettings>> {
    let api = match snapshot.require() {
        Ok(api) => api,
        Err(e) => return rejected(e),
    };
    producer(move |opts| {
        let api = api.clone();
        async move { api.get_user(&opts).await.map(Some) }
    })
}

// Fetchers with their defaults and options.

pub fn registered_models(gate: &ApiGate<dyn ModelRegistryApi>) -> GatedFetcher<RegisteredModelList> {
    GatedFetcher::new(
        gate,
        (),
        RegisteredModelList::empty(),
        FetchOptions::pure(),
        list_registered_models_producer,
    )
}

pub fn registered_model(
    gate: &ApiGate<dyn ModelRegistryApi>,
    registered_model_id: Option<String>,
) -> GatedFetcher<Option<RegisteredModel>, Option<String>> {
    GatedFetcher::new(
        gate,
        registered_model_id,
        None,
        FetchOptions::default(),
        registered_model_producer,
    )
}

pub fn model_versions_by_registered_model(
    gate: &ApiGate<dyn ModelRegistryApi>,
    registered_model_id: Option<String>,
) -> GatedFetcher<ModelVersionList, Option<String>> {
    GatedFetcher::new(
        gate,
        registered_model_id,
        ModelVersionList::empty(),
        FetchOptions::default(),
        model_versions_by_registered_model_producer,
    )
}

pub fn model_version(
    gate: &ApiGate<dyn ModelRegistryApi>,
    model_version_id: Option<String>,
) -> GatedFetcher<Option<ModelVersion>, Option<String>> {
    GatedFetcher::new(
        gate,
        model_version_id,
        None,
        FetchOptions::default(),
        model_version_producer,
    )
}

pub fn model_artifacts_by_version_id(
    gate: &ApiGate<dyn ModelRegistryApi>,
    model_version_id: Option<String>,
) -> GatedFetcher<ModelArtifactList, Option<String>> {
    GatedFetcher::new(
        gate,
        model_version_id,
        ModelArtifactList::empty(),
        FetchOptions::default(),
        model_artifacts_by_version_id_producer,
    )
}

pub fn model_registries(gate: &ApiGate<dyn K8sApi>) -> GatedFetcher<Vec<ModelRegistry>> {
    GatedFetcher::new(gate, (), Vec::new(), FetchOptions::pure(), model_registries_producer)
}

pub fn namespaces(gate: &ApiGate<dyn K8sApi>) -> GatedFetcher<Vec<Namespace>> {
    GatedFetcher::new(gate, (), Vec::new(), FetchOptions::default(), namespaces_producer)
}

pub fn user(gate: &ApiGate<dyn K8sApi>) -> GatedFetcher<Option<UserSettings>> {
    GatedFetcher::new(gate, (), None, FetchOptions::default(), user_producer)
}
