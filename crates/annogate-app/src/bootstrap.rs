//! Wiring configuration into the gateway's components.

use std::sync::Arc;

use annogate_server::{
    BuiltinDefaults, DynAnnotationEngine, GatewayOptions, GatewayState, GatewayStateHandle,
    PropertyResolver, ResourceLoader, ResourceOverlays,
};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::resources::LayeredResources;

pub fn resources(config: &AppConfig) -> Arc<dyn ResourceLoader> {
    Arc::new(LayeredResources::standard(config.resources.dir.as_deref()))
}

pub fn resolver(config: &AppConfig, resources: Arc<dyn ResourceLoader>) -> PropertyResolver {
    let defaults =
        BuiltinDefaults::detect(resources.as_ref()).extend(&config.pipeline.default_properties());
    PropertyResolver::new(defaults, Arc::new(ResourceOverlays::new(resources)))
}

pub async fn gateway_state(
    config: &AppConfig,
    engine: DynAnnotationEngine,
) -> Result<GatewayStateHandle, AppError> {
    let resolver = resolver(config, resources(config));
    let options = GatewayOptions {
        cache_capacity: config.pipeline.cache_capacity,
        fixed_properties: config.pipeline.fixed_properties(),
    };
    let state = GatewayState::bootstrap(engine, resolver, options).await?;
    tracing::info!(
        fixed = %state.fixed_properties(),
        cache_capacity = ?config.pipeline.cache_capacity,
        "gateway ready"
    );
    Ok(Arc::new(state))
}
