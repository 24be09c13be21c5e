//! Running a pipeline over input text and rendering the result.

use std::fmt;

use thiserror::Error;

use crate::engine::{Annotation, DynPipeline};

#[derive(Debug, Clone, Error)]
pub enum AnnotationError {
    #[error("annotation failed: {message}")]
    ProcessingFailed { message: String },
    #[error("rendering {format} output failed: {message}")]
    RenderFailed {
        format: OutputFormat,
        message: String,
    },
}

/// Renderer selected by the `outputFormat` option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    #[default]
    Json,
    Xml,
    Conll,
}

impl OutputFormat {
    /// Map an option value to a format; anything unrecognised renders JSON.
    pub fn from_option(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("xml") => OutputFormat::Xml,
            Some("conll") => OutputFormat::Conll,
            _ => OutputFormat::Json,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Xml => "xml",
            OutputFormat::Conll => "conll",
        }
    }

    /// Content type used by the parameter-driven endpoint.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Xml => "text/xml",
            OutputFormat::Conll => "text/plain",
        }
    }

    /// Content type used by the fixed per-format endpoints.
    pub fn fixed_content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Xml => "application/xml",
            OutputFormat::Conll => "text/plain",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub format: OutputFormat,
    pub body: Vec<u8>,
}

/// Stateless front for pipeline invocation. Annotation and rendering are
/// CPU-bound and run on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationDispatcher;

impl AnnotationDispatcher {
    pub async fn annotate(
        &self,
        pipeline: DynPipeline,
        text: String,
    ) -> Result<Annotation, AnnotationError> {
        tokio::task::spawn_blocking(move || annotate_blocking(&pipeline, &text))
            .await
            .map_err(|error| AnnotationError::ProcessingFailed {
                message: format!("annotation task aborted: {error}"),
            })?
    }

    pub fn render(
        &self,
        pipeline: &DynPipeline,
        annotation: &Annotation,
        format: OutputFormat,
    ) -> Result<Rendered, AnnotationError> {
        let mut body = Vec::new();
        pipeline
            .render(annotation, format, &mut body)
            .map_err(|error| AnnotationError::RenderFailed {
                format,
                message: error.message,
            })?;
        Ok(Rendered { format, body })
    }

    pub async fn annotate_and_render(
        &self,
        pipeline: DynPipeline,
        text: String,
        format: OutputFormat,
    ) -> Result<Rendered, AnnotationError> {
        let dispatcher = *self;
        tokio::task::spawn_blocking(move || {
            let annotation = annotate_blocking(&pipeline, &text)?;
            dispatcher.render(&pipeline, &annotation, format)
        })
        .await
        .map_err(|error| AnnotationError::ProcessingFailed {
            message: format!("annotation task aborted: {error}"),
        })?
    }
}

fn annotate_blocking(pipeline: &DynPipeline, text: &str) -> Result<Annotation, AnnotationError> {
    pipeline
        .annotate(text)
        .map_err(|error| AnnotationError::ProcessingFailed {
            message: error.message,
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;
    use crate::engine::{EngineError, Pipeline};

    struct EchoPipeline;

    impl Pipeline for EchoPipeline {
        fn annotate(&self, text: &str) -> Result<Annotation, EngineError> {
            if text == "panic" {
                panic!("engine bug");
            }
            if text.is_empty() {
                return Err(EngineError::new("nothing to annotate"));
            }
            Ok(Annotation::new(text, text.len()))
        }

        fn render(
            &self,
            annotation: &Annotation,
            format: OutputFormat,
            out: &mut dyn Write,
        ) -> Result<(), EngineError> {
            let len = annotation
                .document::<usize>()
                .ok_or_else(|| EngineError::new("foreign annotation"))?;
            write!(out, "{}:{}:{}", format, annotation.text(), len)?;
            Ok(())
        }
    }

    #[test]
    fn unknown_formats_fall_back_to_json() {
        assert_eq!(OutputFormat::from_option(Some("yaml")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_option(None), OutputFormat::Json);
        assert_eq!(OutputFormat::from_option(Some("xml")), OutputFormat::Xml);
        assert_eq!(OutputFormat::from_option(Some("conll")), OutputFormat::Conll);
        assert_eq!(OutputFormat::Json.content_type(), "application/json");
        assert_eq!(OutputFormat::Xml.content_type(), "text/xml");
        assert_eq!(OutputFormat::Xml.fixed_content_type(), "application/xml");
    }

    #[tokio::test]
    async fn annotates_and_renders() {
        let pipeline: DynPipeline = Arc::new(EchoPipeline);
        let rendered = AnnotationDispatcher
            .annotate_and_render(pipeline, "abc".to_string(), OutputFormat::Conll)
            .await
            .expect("renders");
        assert_eq!(rendered.body, b"conll:abc:3");
    }

    #[tokio::test]
    async fn engine_failure_is_processing_failed() {
        let pipeline: DynPipeline = Arc::new(EchoPipeline);
        let error = AnnotationDispatcher
            .annotate(pipeline, String::new())
            .await
            .expect_err("empty text fails");
        assert!(matches!(error, AnnotationError::ProcessingFailed { .. }));
    }

    #[tokio::test]
    async fn panicking_engine_does_not_escape() {
        let pipeline: DynPipeline = Arc::new(EchoPipeline);
        let error = AnnotationDispatcher
            .annotate(pipeline, "panic".to_string())
            .await
            .expect_err("panic becomes an error");
        assert!(matches!(error, AnnotationError::ProcessingFailed { .. }));
    }

    #[tokio::test]
    async fn separate_annotations_do_not_interfere() {
        let pipeline: DynPipeline = Arc::new(EchoPipeline);
        let dispatcher = AnnotationDispatcher;
        let (left, right) = tokio::join!(
            dispatcher.annotate(Arc::clone(&pipeline), "left".to_string()),
            dispatcher.annotate(Arc::clone(&pipeline), "right!".to_string()),
        );
        let left = left.expect("left annotates");
        let right = right.expect("right annotates");
        let rendered = dispatcher
            .render(&pipeline, &right, OutputFormat::Json)
            .expect("renders");
        assert_eq!(left.text(), "left");
        assert_eq!(rendered.body, b"json:right!:6");
    }
}
