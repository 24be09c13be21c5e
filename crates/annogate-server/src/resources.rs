//! Named-resource lookup used for language overlays and model probing.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource `{name}` not found")]
    NotFound { name: String },
    #[error("failed to read resource `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResourceError {
    pub fn not_found(name: &str) -> Self {
        ResourceError::NotFound {
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound { .. })
    }
}

/// Resolves a resource name (a relative path such as
/// `StanfordCoreNLP-french.properties`) to its bytes.
pub trait ResourceLoader: Send + Sync + 'static {
    fn load(&self, name: &str) -> Result<Vec<u8>, ResourceError>;

    fn exists(&self, name: &str) -> bool {
        self.load(name).is_ok()
    }
}

/// Fixed in-memory resource set.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(name.into(), bytes.into());
        self
    }
}

impl ResourceLoader for MemoryResources {
    fn load(&self, name: &str) -> Result<Vec<u8>, ResourceError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::not_found(name))
    }

    fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
