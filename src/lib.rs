//! Registry console core: race-safe fetch state, readiness-gated API access and
//! model registry selection, backed by the model registry BFF REST API.

pub mod api;
pub mod config;
pub mod error;
pub mod fetch_state;
pub mod fetchers;
pub mod gate;
pub mod response;
pub mod scope;
pub mod selector;
pub mod types;

#[cfg(test)]
pub(crate) mod test_harness;

pub use api::{k8s_factory, model_registry_factory, ApiOptions, K8sApi, ModelRegistryApi, RestClient};
pub use config::ConsoleConfig;
pub use error::{is_not_ready_error, not_ready_error, ConfigError, FetchError};
pub use fetch_state::{producer, FetchOptions, FetchState, FetchStateController, Producer};
pub use fetchers::GatedFetcher;
pub use gate::{ApiGate, ApiSnapshot};
pub use scope::Scope;
pub use selector::{ModelRegistrySelector, ModelRegistrySelectorContext};
