//! Boundary with the annotation engine.
//!
//! The engine builds [`Pipeline`]s from resolved [`Properties`]. Pipelines are
//! immutable once built and shared across concurrent requests, so
//! implementations must be safe for parallel `annotate` calls.

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::OutputFormat;
use crate::properties::Properties;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        EngineError {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::new(format!("i/o failure: {error}"))
    }
}

/// Result of running a pipeline over one input text.
pub struct Annotation {
    text: String,
    document: Box<dyn Any + Send>,
}

impl Annotation {
    pub fn new<D: Any + Send>(text: impl Into<String>, document: D) -> Self {
        Self {
            text: text.into(),
            document: Box::new(document),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Engine-specific document, if it has type `D`.
    pub fn document<D: Any>(&self) -> Option<&D> {
        self.document.downcast_ref::<D>()
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("chars", &self.text.chars().count())
            .finish_non_exhaustive()
    }
}

pub trait Pipeline: Send + Sync + 'static {
    fn annotate(&self, text: &str) -> Result<Annotation, EngineError>;

    fn render(
        &self,
        annotation: &Annotation,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> Result<(), EngineError>;
}

pub type DynPipeline = Arc<dyn Pipeline>;

#[async_trait]
pub trait AnnotationEngine: Send + Sync + 'static {
    /// Construct a pipeline for `properties`. May load models and take seconds.
    async fn build(&self, properties: &Properties) -> Result<DynPipeline, EngineError>;
}

pub type DynAnnotationEngine = Arc<dyn AnnotationEngine>;
