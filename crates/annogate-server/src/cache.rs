//! Keyed cache of constructed pipelines.
//!
//! Backed by `moka`'s `or_try_insert_with`: at most one construction is in flight per
//! key, callers for the same key await the same result, and failed
//! constructions leave no entry behind. Different keys build independently.

use std::sync::Arc;

use moka::future::Cache;
use thiserror::Error;

use crate::engine::{DynAnnotationEngine, DynPipeline};
use crate::properties::Properties;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("failed to construct pipeline: {message}")]
    ConstructionFailed { message: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

#[derive(Clone)]
pub struct PipelineCache {
    engine: DynAnnotationEngine,
    pipelines: Cache<Properties, DynPipeline>,
}

impl PipelineCache {
    /// Unbounded cache; entries live for the process lifetime.
    pub fn new(engine: DynAnnotationEngine) -> Self {
        Self::with_capacity(engine, None)
    }

    /// `Some(n)` opts into size-bounded eviction of the least useful entries.
    pub fn with_capacity(engine: DynAnnotationEngine, max_capacity: Option<u64>) -> Self {
        let builder = Cache::builder();
        let pipelines = match max_capacity {
            Some(capacity) => builder.max_capacity(capacity).build(),
            None => builder.build(),
        };
        Self { engine, pipelines }
    }

    pub async fn get_or_create(&self, properties: &Properties) -> Result<DynPipeline, PipelineError> {
        self.lookup(properties).await.map(|(pipeline, _)| pipeline)
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether this
    /// call constructed the pipeline. Callers that awaited another request's
    /// in-flight construction report a hit.
    pub async fn lookup(
        &self,
        properties: &Properties,
    ) -> Result<(DynPipeline, CacheStatus), PipelineError> {
        let engine = Arc::clone(&self.engine);
        let key = properties.clone();
        let loader = async move {
            tracing::info!(properties = %key, "creating new pipeline");
            engine
                .build(&key)
                .await
                .map_err(|error| PipelineError::ConstructionFailed {
                    message: error.message,
                })
        };

        match self
            .pipelines
            .entry_by_ref(properties)
            .or_try_insert_with(loader)
            .await
        {
            Ok(entry) => {
                let status = if entry.is_fresh() {
                    CacheStatus::Miss
                } else {
                    CacheStatus::Hit
                };
                Ok((entry.into_value(), status))
            }
            Err(error) => {
                let owned = Arc::try_unwrap(error).unwrap_or_else(|arc| arc.as_ref().clone());
                tracing::warn!(%owned, "pipeline construction failed");
                Err(owned)
            }
        }
    }

    pub async fn entry_count(&self) -> u64 {
        self.pipelines.run_pending_tasks().await;
        self.pipelines.entry_count()
    }
}
