//! Registry console: lists the model registries visible to the user, selects one
//! and prints its registered models.
//!
//! Run from repo root: `cargo run -p registry-console-cli`
//! With `REGISTRY_REFRESH_SECS` set the model list is polled until Ctrl-C.

use registry_console::fetchers::list_registered_models_producer;
use registry_console::types::{RegisteredModelList, RegisteredModel};
use registry_console::{
    k8s_factory, model_registry_factory, ApiGate, ConsoleConfig, FetchOptions, FetchState,
    GatedFetcher, ModelRegistrySelector, ModelRegistrySelectorContext, RestClient,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Loads `.env` too, so RUST_LOG from that file reaches the filter below.
    let config = ConsoleConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registry_console=info")),
        )
        .init();

    let client = RestClient::new(&config)?;
    tracing::info!(bff = %config.bff_url, scope = %config.scope, "registry console starting");

    let cluster = ApiGate::new(config.scope.clone(), k8s_factory(client.clone()));
    let selector = ModelRegistrySelectorContext::mount(&cluster);
    let selection = wait_for_registries(&selector, &config).await?;
    if let Some(err) = &selection.model_registries_load_error {
        tracing::error!(error = %err, "could not list model registries");
        return Err(err.clone().into());
    }
    for registry in &selection.model_registries {
        tracing::info!(name = %registry.name, display_name = %registry.display_name, "model registry");
    }

    if let Some(wanted) = &config.model_registry {
        match selection.model_registries.iter().find(|r| &r.name == wanted) {
            Some(found) => selector.update_preferred_model_registry(Some(found.clone())),
            None => tracing::warn!(model_registry = %wanted, "configured model registry not found"),
        }
    }
    let Some(registry) = selector.preferred_model_registry() else {
        tracing::info!("no model registries available");
        selector.unmount();
        return Ok(());
    };
    tracing::info!(model_registry = %registry.name, "using model registry");

    let registry_gate = ApiGate::new(
        config.scope.clone(),
        model_registry_factory(client, Some(registry.name.clone())),
    );
    let models = GatedFetcher::new(
        &registry_gate,
        (),
        RegisteredModelList::empty(),
        FetchOptions {
            initial_promise_purity: false,
            refresh_rate: config.refresh_rate,
        },
        list_registered_models_producer,
    );
    let mut updates = models.subscribe();

    loop {
        let state = next_result(&mut updates).await?;
        report(&state);
        if config.refresh_rate.is_none() {
            break;
        }
        tokio::select! {
            changed = updates.changed() => changed?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    selector.unmount();
    Ok(())
}

/// Wait for the first registry load. The selector hides the first failure, so
/// a load that has not landed within the request timeout is retried once to
/// surface its error.
async fn wait_for_registries(
    selector: &ModelRegistrySelectorContext,
    config: &ConsoleConfig,
) -> Result<ModelRegistrySelector, Box<dyn std::error::Error>> {
    let settled = |s: &ModelRegistrySelector| {
        s.model_registries_loaded || s.model_registries_load_error.is_some()
    };
    let mut rx = selector.subscribe();
    let first = tokio::time::timeout(config.request_timeout, async {
        rx.wait_for(settled).await.map(|s| s.clone())
    })
    .await;
    if let Ok(state) = first {
        return Ok(state?);
    }
    tracing::debug!("model registries not loaded yet, retrying");
    selector.refresh();
    let state = rx.wait_for(settled).await?.clone();
    Ok(state)
}

async fn next_result(
    rx: &mut watch::Receiver<FetchState<RegisteredModelList>>,
) -> Result<FetchState<RegisteredModelList>, watch::error::RecvError> {
    let state = rx.wait_for(|s| s.loaded || s.error.is_some()).await?.clone();
    Ok(state)
}

fn report(state: &FetchState<RegisteredModelList>) {
    if let Some(err) = state.visible_error() {
        tracing::error!(error = %err, "could not list registered models");
        return;
    }
    tracing::info!(count = state.data.items.len(), "registered models");
    for model in &state.data.items {
        log_model(model);
    }
}

fn log_model(model: &RegisteredModel) {
    tracing::info!(
        id = %model.id,
        name = %model.name,
        owner = model.owner.as_deref().unwrap_or("-"),
        state = ?model.state,
        "registered model"
    );
}
