//! Concrete [`ResourceLoader`]s: a filesystem directory, overlays compiled into
//! the binary, and a first-match stack of both.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use annogate_server::{ResourceError, ResourceLoader};

static EMBEDDED: &[(&str, &str)] = &[
    (
        "StanfordCoreNLP-arabic.properties",
        include_str!("../resources/StanfordCoreNLP-arabic.properties"),
    ),
    (
        "StanfordCoreNLP-chinese.properties",
        include_str!("../resources/StanfordCoreNLP-chinese.properties"),
    ),
    (
        "StanfordCoreNLP-english.properties",
        include_str!("../resources/StanfordCoreNLP-english.properties"),
    ),
    (
        "StanfordCoreNLP-french.properties",
        include_str!("../resources/StanfordCoreNLP-french.properties"),
    ),
    (
        "StanfordCoreNLP-german.properties",
        include_str!("../resources/StanfordCoreNLP-german.properties"),
    ),
    (
        "StanfordCoreNLP-hungarian.properties",
        include_str!("../resources/StanfordCoreNLP-hungarian.properties"),
    ),
    (
        "StanfordCoreNLP-italian.properties",
        include_str!("../resources/StanfordCoreNLP-italian.properties"),
    ),
    (
        "StanfordCoreNLP-spanish.properties",
        include_str!("../resources/StanfordCoreNLP-spanish.properties"),
    ),
];

/// Resources read from files below a root directory.
#[derive(Debug, Clone)]
pub struct FsResources {
    root: PathBuf,
}

impl FsResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let confined = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        confined.then(|| self.root.join(relative))
    }
}

impl ResourceLoader for FsResources {
    fn load(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        let path = self
            .path_for(name)
            .ok_or_else(|| ResourceError::not_found(name))?;
        std::fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResourceError::not_found(name),
            _ => ResourceError::Io {
                name: name.to_string(),
                source,
            },
        })
    }

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_some_and(|path| path.is_file())
    }
}

/// Language overlays shipped inside the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedResources;

impl EmbeddedResources {
    pub fn names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.iter().map(|(name, _)| *name)
    }

    fn find(name: &str) -> Option<&'static str> {
        EMBEDDED
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, text)| *text)
    }
}

impl ResourceLoader for EmbeddedResources {
    fn load(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        Self::find(name)
            .map(|text| text.as_bytes().to_vec())
            .ok_or_else(|| ResourceError::not_found(name))
    }

    fn exists(&self, name: &str) -> bool {
        Self::find(name).is_some()
    }
}

/// Tries each layer in order; the first one holding the resource wins.
#[derive(Clone, Default)]
pub struct LayeredResources {
    layers: Vec<Arc<dyn ResourceLoader>>,
}

impl LayeredResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: Arc<dyn ResourceLoader>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Directory resources (when configured) shadowing the embedded overlays.
    pub fn standard(dir: Option<&Path>) -> Self {
        let mut layered = Self::new();
        if let Some(dir) = dir {
            tracing::debug!(dir = %dir.display(), "resource directory configured");
            layered = layered.with_layer(Arc::new(FsResources::new(dir)));
        }
        layered.with_layer(Arc::new(EmbeddedResources))
    }
}

impl ResourceLoader for LayeredResources {
    fn load(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        let mut failure = None;
        for layer in &self.layers {
            match layer.load(name) {
                Ok(bytes) => return Ok(bytes),
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    tracing::warn!(%error, "resource layer failed; trying next");
                    failure.get_or_insert(error);
                }
            }
        }
        Err(failure.unwrap_or_else(|| ResourceError::not_found(name)))
    }

    fn exists(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer.exists(name))
    }
}
