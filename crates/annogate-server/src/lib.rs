pub mod blob;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod merge;
pub mod overlay;
pub mod properties;
pub mod resources;
mod server;

pub use cache::{CacheStatus, PipelineCache, PipelineError};
pub use config::*;
pub use dispatch::{AnnotationDispatcher, AnnotationError, OutputFormat, Rendered};
pub use engine::{
    Annotation, AnnotationEngine, DynAnnotationEngine, DynPipeline, EngineError, Pipeline,
};
pub use merge::{BuiltinDefaults, ConfigError, PropertyResolver};
pub use overlay::{LanguageOverlay, LanguageOverlays, ResourceOverlays};
pub use properties::{Properties, RawParameters};
pub use resources::{MemoryResources, ResourceError, ResourceLoader};
pub use server::{
    GatewayOptions, GatewayState, GatewayStateHandle, ServerError, build_api_router,
    build_app_router, serve,
};
