//! Fetch-state controller: wraps one async producer and publishes a race-safe
//! `FetchState<T>`.
//!
//! Every invocation of the producer gets an increasing sequence number when it
//! starts. A resolution is applied only if its number is still the highest one
//! issued; anything older is dropped. Starting a newer invocation also cancels
//! the previous invocation's token so the producer can stop early.

use crate::api::ApiOptions;
use crate::error::FetchError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type ProducerFuture<T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'static>>;

/// Async operation wrapped by a controller. Called once per invocation.
pub type Producer<T> = Arc<dyn Fn(ApiOptions) -> ProducerFuture<T> + Send + Sync>;

/// Box a closure returning a future into a [`Producer`].
pub fn producer<T, F, Fut>(f: F) -> Producer<T>
where
    T: 'static,
    F: Fn(ApiOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move |opts| -> ProducerFuture<T> { Box::pin(f(opts)) })
}

/// Producer that fails immediately without doing any work.
pub fn rejected<T: Send + 'static>(err: FetchError) -> Producer<T> {
    Arc::new(move |_opts| -> ProducerFuture<T> {
        let err = err.clone();
        Box::pin(async move { Err(err) })
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchState<T> {
    pub data: T,
    pub loaded: bool,
    pub error: Option<FetchError>,
}

impl<T> FetchState<T> {
    fn new(data: T) -> Self {
        FetchState {
            data,
            loaded: false,
            error: None,
        }
    }

    /// Error worth showing to a user; NotReady errors mean "still waiting" and are hidden.
    pub fn visible_error(&self) -> Option<&FetchError> {
        self.error.as_ref().filter(|e| !e.is_not_ready())
    }
}

#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Do not surface the rejection of the controller's very first invocation.
    pub initial_promise_purity: bool,
    /// Re-invoke the current producer on this interval.
    pub refresh_rate: Option<Duration>,
}

impl FetchOptions {
    pub fn pure() -> Self {
        FetchOptions {
            initial_promise_purity: true,
            refresh_rate: None,
        }
    }
}

struct Inner<T, D> {
    issued: u64,
    deps: Option<D>,
    producer: Option<Producer<T>>,
    cancel: Option<CancellationToken>,
}

struct Shared<T, D> {
    options: FetchOptions,
    inner: Mutex<Inner<T, D>>,
    state: watch::Sender<FetchState<T>>,
}

/// Owns the state of one producer. `D` is the dependency list: the producer is
/// re-invoked whenever a different `D` is declared.
pub struct FetchStateController<T, D = ()> {
    shared: Arc<Shared<T, D>>,
    poller: Option<JoinHandle<()>>,
}

impl<T, D> FetchStateController<T, D>
where
    T: Send + Sync + 'static,
    D: PartialEq + Send + 'static,
{
    /// Create an idle controller holding `default`. With a `refresh_rate` this
    /// must be called inside a tokio runtime.
    ///
    /// Invocations run as spawned tasks, so [`set_producer`](Self::set_producer)
    /// and [`refresh`](Self::refresh) always need a tokio runtime.
    pub fn new(default: T, options: FetchOptions) -> Self {
        let (state, _) = watch::channel(FetchState::new(default));
        let shared = Arc::new(Shared {
            options,
            inner: Mutex::new(Inner {
                issued: 0,
                deps: None,
                producer: None,
                cancel: None,
            }),
            state,
        });
        let poller = shared
            .options
            .refresh_rate
            .map(|every| spawn_poller(Arc::downgrade(&shared), every));
        FetchStateController { shared, poller }
    }

    /// Declare the producer for `deps`. Starts a new invocation and returns its
    /// sequence number if `deps` differs from the previous declaration.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn set_producer(&self, deps: D, producer: Producer<T>) -> Option<u64> {
        let mut inner = self.shared.lock();
        if inner.deps.as_ref() == Some(&deps) {
            return None;
        }
        inner.deps = Some(deps);
        inner.producer = Some(producer);
        Some(Shared::start(&self.shared, inner))
    }

    /// Re-invoke the current producer with a fresh sequence number.
    /// Returns `None` when no producer has been declared yet. Like
    /// `set_producer`, needs a tokio runtime.
    pub fn refresh(&self) -> Option<u64> {
        Shared::refresh(&self.shared)
    }

    /// Highest sequence number issued so far (0 before the first invocation).
    pub fn latest_sequence(&self) -> u64 {
        self.shared.lock().issued
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> FetchState<T>
    where
        T: Clone,
    {
        self.shared.state.borrow().clone()
    }
}

impl<T, D> Drop for FetchStateController<T, D> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        let mut inner = self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
    }
}

impl<T, D> Shared<T, D>
where
    T: Send + Sync + 'static,
    D: PartialEq + Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Inner<T, D>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(this: &Arc<Self>) -> Option<u64> {
        let inner = this.lock();
        if inner.producer.is_none() {
            return None;
        }
        Some(Shared::start(this, inner))
    }

    fn start(this: &Arc<Self>, mut inner: MutexGuard<'_, Inner<T, D>>) -> u64 {
        let Some(producer) = inner.producer.clone() else {
            return inner.issued;
        };
        inner.issued += 1;
        let seq = inner.issued;
        let token = CancellationToken::new();
        if let Some(previous) = inner.cancel.replace(token.clone()) {
            previous.cancel();
        }
        drop(inner);

        tracing::debug!(seq = seq, "invoking producer");
        let fut = producer(ApiOptions::new(token.clone()));
        let shared = Arc::clone(this);
        tokio::spawn(async move {
            let result = tokio::select! {
                r = fut => r,
                _ = token.cancelled() => {
                    tracing::debug!(seq = seq, "invocation cancelled");
                    return;
                }
            };
            shared.apply(seq, result);
        });
        seq
    }

    fn apply(&self, seq: u64, result: Result<T, FetchError>) {
        // Held while publishing so two resolutions cannot interleave.
        let inner = self.lock();
        if seq != inner.issued {
            tracing::debug!(seq = seq, latest = inner.issued, "discarding stale resolution");
            return;
        }
        match result {
            Ok(data) => {
                self.state.send_modify(|s| {
                    s.data = data;
                    s.loaded = true;
                    s.error = None;
                });
            }
            Err(e) if seq == 1 && self.options.initial_promise_purity => {
                tracing::debug!(seq = seq, error = %e, "initial rejection suppressed");
            }
            Err(e) => {
                if e.is_not_ready() {
                    tracing::debug!(seq = seq, error = %e, "producer not ready");
                } else {
                    tracing::warn!(seq = seq, error = %e, "producer failed");
                }
                self.state.send_modify(|s| s.error = Some(e));
            }
        }
    }
}

fn spawn_poller<T, D>(shared: Weak<Shared<T, D>>, every: Duration) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    D: PartialEq + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match shared.upgrade() {
                Some(shared) => {
                    Shared::refresh(&shared);
                }
                None => break,
            }
        }
    })
}
