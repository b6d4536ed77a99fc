//! Model registry selector: the loaded list of registries plus the registry the
//! user is working in.
//!
//! The preferred registry is the explicit choice if one was made, otherwise the
//! first loaded registry. An explicit choice survives reloads of the list and
//! is only forgotten when the context is unmounted.

use crate::api::K8sApi;
use crate::error::FetchError;
use crate::fetch_state::FetchState;
use crate::fetchers::{self, GatedFetcher};
use crate::gate::ApiGate;
use crate::types::ModelRegistry;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Value published to subscribers of the selector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelRegistrySelector {
    pub model_registries_loaded: bool,
    /// Load error exactly as the fetcher reported it, NotReady included.
    pub model_registries_load_error: Option<FetchError>,
    pub model_registries: Vec<ModelRegistry>,
    pub preferred_model_registry: Option<ModelRegistry>,
}

struct SelectorShared {
    explicit: Mutex<Option<ModelRegistry>>,
    state: watch::Sender<ModelRegistrySelector>,
}

impl SelectorShared {
    fn explicit(&self) -> std::sync::MutexGuard<'_, Option<ModelRegistry>> {
        self.explicit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_load(&self, load: &FetchState<Vec<ModelRegistry>>) {
        let explicit = self.explicit();
        self.state.send_modify(|s| {
            s.model_registries_loaded = load.loaded;
            s.model_registries_load_error = load.error.clone();
            s.model_registries = load.data.clone();
            s.preferred_model_registry = resolve_preferred(&explicit, &s.model_registries);
        });
    }

    fn set_preferred(&self, choice: Option<ModelRegistry>) {
        let mut explicit = self.explicit();
        *explicit = choice;
        self.state.send_modify(|s| {
            s.preferred_model_registry = resolve_preferred(&explicit, &s.model_registries);
        });
    }
}

fn resolve_preferred(explicit: &Option<ModelRegistry>, items: &[ModelRegistry]) -> Option<ModelRegistry> {
    explicit.clone().or_else(|| items.first().cloned())
}

/// Selector context for one session. Created by [`mount`](Self::mount), torn
/// down by [`unmount`](Self::unmount) or drop.
pub struct ModelRegistrySelectorContext {
    shared: Arc<SelectorShared>,
    fetcher: GatedFetcher<Vec<ModelRegistry>>,
    follower: JoinHandle<()>,
}

impl ModelRegistrySelectorContext {
    /// Start loading registries through `gate`. Must be called inside a tokio runtime.
    pub fn mount(gate: &ApiGate<dyn K8sApi>) -> Self {
        let fetcher = fetchers::model_registries(gate);
        let (state, _) = watch::channel(ModelRegistrySelector::default());
        let shared = Arc::new(SelectorShared {
            explicit: Mutex::new(None),
            state,
        });

        let mut load_rx = fetcher.subscribe();
        shared.apply_load(&load_rx.borrow_and_update());
        let weak = Arc::downgrade(&shared);
        let follower = tokio::spawn(follow_loads(weak, load_rx));

        tracing::debug!(scope = %gate.scope(), "model registry selector mounted");
        ModelRegistrySelectorContext {
            shared,
            fetcher,
            follower,
        }
    }

    /// Stop loading and close every subscription.
    pub fn unmount(self) {
        tracing::debug!("model registry selector unmounted");
    }

    /// Record the user's choice. Last write wins; `None` falls back to the first registry.
    pub fn update_preferred_model_registry(&self, choice: Option<ModelRegistry>) {
        tracing::debug!(
            model_registry = choice.as_ref().map(|r| r.name.as_str()).unwrap_or("-"),
            "preferred model registry updated"
        );
        self.shared.set_preferred(choice);
    }

    /// Reload the registry list.
    pub fn refresh(&self) -> Option<u64> {
        self.fetcher.refresh()
    }

    pub fn snapshot(&self) -> ModelRegistrySelector {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelRegistrySelector> {
        self.shared.state.subscribe()
    }

    pub fn preferred_model_registry(&self) -> Option<ModelRegistry> {
        self.shared.state.borrow().preferred_model_registry.clone()
    }
}

impl Drop for ModelRegistrySelectorContext {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

async fn follow_loads(shared: Weak<SelectorShared>, mut load_rx: watch::Receiver<FetchState<Vec<ModelRegistry>>>) {
    while load_rx.changed().await.is_ok() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let load = load_rx.borrow_and_update().clone();
        shared.apply_load(&load);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{model_registry, settle, MockK8sApi};

    fn mounted(registries: Vec<ModelRegistry>) -> (Arc<MockK8sApi>, ApiGate<dyn K8sApi>, ModelRegistrySelectorContext) {
        let api = Arc::new(MockK8sApi::with_registries(registries));
        let handle: Arc<dyn K8sApi> = api.clone();
        let gate = ApiGate::ready(handle);
        let ctx = ModelRegistrySelectorContext::mount(&gate);
        (api, gate, ctx)
    }

    async fn loaded(ctx: &ModelRegistrySelectorContext) -> ModelRegistrySelector {
        let mut rx = ctx.subscribe();
        let state = rx.wait_for(|s| s.model_registries_loaded).await.unwrap().clone();
        state
    }

    #[tokio::test]
    async fn defaults_to_first_registry() {
        let (a, b, c) = (model_registry("a"), model_registry("b"), model_registry("c"));
        let (_api, _gate, ctx) = mounted(vec![a.clone(), b, c]);
        let state = loaded(&ctx).await;
        assert_eq!(state.model_registries.len(), 3);
        assert_eq!(state.preferred_model_registry, Some(a));
        assert_eq!(state.model_registries_load_error, None);
    }

    #[tokio::test]
    async fn explicit_choice_survives_reload() {
        let (a, b, c) = (model_registry("a"), model_registry("b"), model_registry("c"));
        let (api, _gate, ctx) = mounted(vec![a, b.clone(), c]);
        loaded(&ctx).await;

        ctx.update_preferred_model_registry(Some(b.clone()));
        assert_eq!(ctx.preferred_model_registry(), Some(b.clone()));

        let (d, e) = (model_registry("d"), model_registry("e"));
        api.set_registries(Ok(vec![d.clone(), e.clone()]));
        ctx.refresh();
        let mut rx = ctx.subscribe();
        let state = rx
            .wait_for(|s| s.model_registries.first() == Some(&d))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.model_registries, vec![d, e]);
        assert_eq!(state.preferred_model_registry, Some(b));
    }

    #[tokio::test]
    async fn clearing_choice_falls_back_to_first() {
        let (a, b) = (model_registry("a"), model_registry("b"));
        let (_api, _gate, ctx) = mounted(vec![a.clone(), b.clone()]);
        loaded(&ctx).await;
        ctx.update_preferred_model_registry(Some(b.clone()));
        ctx.update_preferred_model_registry(None);
        assert_eq!(ctx.preferred_model_registry(), Some(a));
    }

    #[tokio::test]
    async fn empty_list_has_no_preferred() {
        let (_api, _gate, ctx) = mounted(Vec::new());
        let state = loaded(&ctx).await;
        assert!(state.model_registries.is_empty());
        assert_eq!(state.preferred_model_registry, None);
    }

    #[tokio::test]
    async fn load_error_is_passed_through() {
        let (api, _gate, ctx) = mounted(vec![model_registry("a")]);
        loaded(&ctx).await;

        let err = FetchError::Remote {
            status: 403,
            code: "forbidden".into(),
            message: "user cannot list model registries".into(),
        };
        api.set_registries(Err(err.clone()));
        ctx.refresh();
        let mut rx = ctx.subscribe();
        let state = rx
            .wait_for(|s| s.model_registries_load_error.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(state.model_registries_load_error, Some(err));
        assert!(state.model_registries_loaded);
        assert_eq!(state.preferred_model_registry, Some(model_registry("a")));
    }

    #[tokio::test]
    async fn unavailable_gate_stays_uninitialized() {
        let gate: ApiGate<dyn K8sApi> = ApiGate::unavailable();
        let ctx = ModelRegistrySelectorContext::mount(&gate);
        settle().await;
        assert_eq!(ctx.snapshot(), ModelRegistrySelector::default());

        ctx.refresh();
        let mut rx = ctx.subscribe();
        let state = rx
            .wait_for(|s| s.model_registries_load_error.is_some())
            .await
            .unwrap()
            .clone();
        assert!(state.model_registries_load_error.is_some_and(|e| e.is_not_ready()));
        assert!(!state.model_registries_loaded);
    }

    #[tokio::test]
    async fn unmount_closes_subscriptions() {
        let (_api, _gate, ctx) = mounted(vec![model_registry("a")]);
        loaded(&ctx).await;
        let mut rx = ctx.subscribe();
        ctx.unmount();
        assert!(rx.changed().await.is_err());
    }
}
