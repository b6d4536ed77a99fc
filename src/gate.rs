//! API readiness gate: a capability object that may not be built yet.
//!
//! Producers never hold the capability directly. They take an [`ApiSnapshot`]
//! and go through [`ApiSnapshot::require`], which fails with a NotReady error
//! while the gate is unavailable, so no remote call can be made against an API
//! that does not exist.

use crate::error::FetchError;
use crate::scope::Scope;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub const API_NOT_AVAILABLE: &str = "API not yet available";

/// Builds the capability for a scope. A NotReady error means "not yet"; other
/// errors are logged. Either way the gate stays unavailable.
pub type ApiFactory<A> = Arc<dyn Fn(&Scope) -> Result<Arc<A>, FetchError> + Send + Sync>;

/// Consistent view of the gate at one generation.
pub struct ApiSnapshot<A: ?Sized> {
    generation: u64,
    api: Option<Arc<A>>,
}

impl<A: ?Sized> Clone for ApiSnapshot<A> {
    fn clone(&self) -> Self {
        ApiSnapshot {
            generation: self.generation,
            api: self.api.clone(),
        }
    }
}

impl<A: ?Sized> std::fmt::Debug for ApiSnapshot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSnapshot")
            .field("generation", &self.generation)
            .field("api_available", &self.api.is_some())
            .finish()
    }
}

/// Dependency key of a snapshot: changes whenever the capability is rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GateKey {
    pub generation: u64,
    pub available: bool,
}

impl<A: ?Sized> ApiSnapshot<A> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn api_available(&self) -> bool {
        self.api.is_some()
    }

    pub fn key(&self) -> GateKey {
        GateKey {
            generation: self.generation,
            available: self.api_available(),
        }
    }

    /// The capability, or NotReady if it has not been built.
    pub fn require(&self) -> Result<Arc<A>, FetchError> {
        self.api
            .clone()
            .ok_or_else(|| FetchError::not_ready(API_NOT_AVAILABLE))
    }
}

struct GateInner<A: ?Sized> {
    scope: Scope,
    factory: ApiFactory<A>,
    generation: u64,
}

pub struct ApiGate<A: ?Sized> {
    inner: Mutex<GateInner<A>>,
    current: watch::Sender<ApiSnapshot<A>>,
}

impl<A> ApiGate<A>
where
    A: ?Sized + Send + Sync + 'static,
{
    /// Build the capability for `scope` right away.
    pub fn new<F>(scope: Scope, factory: F) -> Self
    where
        F: Fn(&Scope) -> Result<Arc<A>, FetchError> + Send + Sync + 'static,
    {
        let (current, _) = watch::channel(ApiSnapshot {
            generation: 0,
            api: None,
        });
        let gate = ApiGate {
            inner: Mutex::new(GateInner {
                scope,
                factory: Arc::new(factory),
                generation: 0,
            }),
            current,
        };
        gate.rebuild(gate.lock());
        gate
    }

    /// Gate around an already built capability, ignoring scope.
    pub fn ready(api: Arc<A>) -> Self {
        ApiGate::new(Scope::cluster(), move |_| Ok(api.clone()))
    }

    /// Gate that never becomes available until its factory is replaced.
    pub fn unavailable() -> Self {
        ApiGate::new(Scope::cluster(), |_| Err(FetchError::not_ready(API_NOT_AVAILABLE)))
    }

    fn lock(&self) -> MutexGuard<'_, GateInner<A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rebuild(&self, mut inner: MutexGuard<'_, GateInner<A>>) {
        inner.generation += 1;
        let api = match (inner.factory)(&inner.scope) {
            Ok(api) => Some(api),
            Err(e) if e.is_not_ready() => {
                tracing::debug!(scope = %inner.scope, reason = %e, "api not ready");
                None
            }
            Err(e) => {
                tracing::warn!(scope = %inner.scope, error = %e, "failed to build api");
                None
            }
        };
        tracing::debug!(
            scope = %inner.scope,
            generation = inner.generation,
            available = api.is_some(),
            "api rebuilt"
        );
        // Published under the lock so readers never see generations out of order.
        self.current.send_replace(ApiSnapshot {
            generation: inner.generation,
            api,
        });
    }

    pub fn snapshot(&self) -> ApiSnapshot<A> {
        self.current.borrow().clone()
    }

    pub fn api_available(&self) -> bool {
        self.current.borrow().api_available()
    }

    /// Rebuild the capability from the current scope. Every dependent sees a
    /// new generation, so in-flight producers built on the old one go stale.
    pub fn refresh_all_api(&self) {
        self.rebuild(self.lock());
    }

    /// Move the gate to another scope. Returns false if the scope is unchanged.
    pub fn set_scope(&self, scope: Scope) -> bool {
        let mut inner = self.lock();
        if inner.scope == scope {
            return false;
        }
        tracing::info!(from = %inner.scope, to = %scope, "api scope changed");
        inner.scope = scope;
        self.rebuild(inner);
        true
    }

    /// Swap the factory (e.g. a different registry was selected) and rebuild.
    pub fn set_factory<F>(&self, factory: F)
    where
        F: Fn(&Scope) -> Result<Arc<A>, FetchError> + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.factory = Arc::new(factory);
        self.rebuild(inner);
    }

    pub fn scope(&self) -> Scope {
        self.lock().scope.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ApiSnapshot<A>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Echo: Send + Sync {
        fn scope_name(&self) -> String;
    }

    struct ScopedEcho(String);

    impl Echo for ScopedEcho {
        fn scope_name(&self) -> String {
            self.0.clone()
        }
    }

    fn echo_gate() -> ApiGate<dyn Echo> {
        ApiGate::new("team-a".parse().unwrap(), |scope: &Scope| {
            let api: Arc<dyn Echo> = Arc::new(ScopedEcho(scope.namespace().unwrap_or("-").to_string()));
            Ok(api)
        })
    }

    #[test]
    fn unavailable_gate_requires_fail_not_ready() {
        let gate: ApiGate<dyn Echo> = ApiGate::unavailable();
        let snap = gate.snapshot();
        assert!(!snap.api_available());
        assert!(!gate.api_available());
        let err = snap.require().err().unwrap();
        assert!(err.is_not_ready());
        assert_eq!(err.to_string(), API_NOT_AVAILABLE);
    }

    #[test]
    fn refresh_bumps_generation_and_keeps_old_snapshots_intact() {
        let gate = echo_gate();
        let before = gate.snapshot();
        assert_eq!(before.generation(), 1);

        gate.refresh_all_api();
        gate.refresh_all_api();
        let after = gate.snapshot();
        assert_eq!(after.generation(), 3);
        assert_ne!(before.key(), after.key());
        assert_eq!(before.require().unwrap().scope_name(), "team-a");
    }

    #[test]
    fn set_scope_rebuilds_against_new_scope() {
        let gate = echo_gate();
        assert!(!gate.set_scope("team-a".parse().unwrap()));
        assert_eq!(gate.snapshot().generation(), 1);

        assert!(gate.set_scope("team-b".parse().unwrap()));
        assert_eq!(gate.scope().namespace(), Some("team-b"));
        assert_eq!(gate.snapshot().require().unwrap().scope_name(), "team-b");
        assert_eq!(gate.snapshot().generation(), 2);
    }

    #[test]
    fn failing_factory_leaves_gate_unavailable() {
        let gate: ApiGate<dyn Echo> =
            ApiGate::new(Scope::cluster(), |_| Err(FetchError::Transport("no route".into())));
        assert!(!gate.api_available());

        gate.set_factory(|_| {
            let api: Arc<dyn Echo> = Arc::new(ScopedEcho("cluster".into()));
            Ok(api)
        });
        assert!(gate.api_available());
        assert_eq!(gate.snapshot().key(), GateKey { generation: 2, available: true });
    }

    #[tokio::test]
    async fn subscribers_observe_rebuilds() {
        let gate = echo_gate();
        let mut rx = gate.subscribe();
        gate.refresh_all_api();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().generation(), 2);
    }
}
