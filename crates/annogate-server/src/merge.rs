//! Resolution of request parameters into [`Properties`].
//!
//! Layering, later wins: built-in defaults, language overlay, plain query
//! parameters, decoded `properties`/`props` blob. A final pass fills in the
//! mention detection strategy.

use std::sync::Arc;

use thiserror::Error;

use crate::blob::{BlobError, decode_blob};
use crate::overlay::LanguageOverlays;
use crate::properties::{
    ANNOTATORS, COREF_LANGUAGE, COREF_MODE, DEFAULT_LANGUAGE, INPUT_FORMAT, MENTION_TYPE,
    OPENIE_STRIP_ENTAILMENTS, OUTPUT_FORMAT, PARSE_ANNOTATOR, PARSE_BINARY_TREES, PARSE_MODEL,
    PIPELINE_LANGUAGE, PRETTY_PRINT, Properties, RawParameters,
};
use crate::resources::ResourceLoader;

pub const PROPERTIES_KEY: &str = "properties";
pub const PROPS_KEY: &str = "props";

pub const DEFAULT_ANNOTATORS: &str =
    "tokenize,ssplit,pos,lemma,ner,parse,depparse,mention,coref,natlog,openie,regexner";
pub const DEPENDENCY_MENTION_TYPE: &str = "dep";
pub const SR_PARSER_MODEL: &str = "edu/stanford/nlp/models/srparser/englishSR.ser.gz";
pub const PCFG_PARSER_MODEL: &str = "edu/stanford/nlp/models/lexparser/englishPCFG.ser.gz";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid language: `{tag}`")]
    UnknownLanguage { tag: String },
    #[error("could not decode properties: {source}")]
    BadEncoding {
        #[source]
        source: BlobError,
    },
}

/// Option defaults applied before any request-supplied value.
#[derive(Debug, Clone)]
pub struct BuiltinDefaults {
    properties: Properties,
}

impl BuiltinDefaults {
    /// Defaults with the parser model chosen by what `resources` can provide.
    pub fn detect(resources: &dyn ResourceLoader) -> Self {
        let parse_model = if resources.exists(SR_PARSER_MODEL) {
            tracing::info!(model = SR_PARSER_MODEL, "using shift-reduce constituency parser");
            SR_PARSER_MODEL
        } else {
            tracing::warn!(
                missing = SR_PARSER_MODEL,
                fallback = PCFG_PARSER_MODEL,
                "shift-reduce parser model not found; using PCFG parser"
            );
            PCFG_PARSER_MODEL
        };
        Self::with_parse_model(parse_model)
    }

    pub fn with_parse_model(parse_model: &str) -> Self {
        let properties = [
            (ANNOTATORS, DEFAULT_ANNOTATORS),
            (COREF_MODE, "statistical"),
            (COREF_LANGUAGE, "en"),
            (INPUT_FORMAT, "text"),
            (OUTPUT_FORMAT, "json"),
            (PRETTY_PRINT, "false"),
            (PARSE_MODEL, parse_model),
            (PARSE_BINARY_TREES, "true"),
            (OPENIE_STRIP_ENTAILMENTS, "true"),
        ]
        .into_iter()
        .collect();
        Self { properties }
    }

    /// Replace or add defaults, e.g. from deployment configuration.
    pub fn extend(mut self, extra: &Properties) -> Self {
        self.properties.overlay(extra);
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

#[derive(Clone)]
pub struct PropertyResolver {
    defaults: BuiltinDefaults,
    overlays: Arc<dyn LanguageOverlays>,
}

impl PropertyResolver {
    pub fn new(defaults: BuiltinDefaults, overlays: Arc<dyn LanguageOverlays>) -> Self {
        Self { defaults, overlays }
    }

    pub async fn resolve(&self, raw: &RawParameters) -> Result<Properties, ConfigError> {
        let blob = match reserved_blob(raw) {
            Some(encoded) => {
                decode_blob(encoded).map_err(|source| ConfigError::BadEncoding { source })?
            }
            None => Properties::new(),
        };

        let mut props = self.defaults.properties().clone();

        let language = blob
            .get(PIPELINE_LANGUAGE)
            .or_else(|| raw.get(PIPELINE_LANGUAGE))
            .or_else(|| props.get(PIPELINE_LANGUAGE))
            .map(str::to_string);
        let mut explicit_mention = blob.contains_key(MENTION_TYPE);
        if let Some(tag) = language.filter(|tag| tag != DEFAULT_LANGUAGE) {
            let overlay = self
                .overlays
                .overlay_for(&tag)
                .await
                .ok_or_else(|| ConfigError::UnknownLanguage { tag: tag.clone() })?;
            tracing::debug!(%tag, entries = overlay.properties().len(), "applying language overlay");
            explicit_mention |= overlay.properties().contains_key(MENTION_TYPE);
            props.overlay(overlay.properties());
        }

        for (key, value) in raw.first_values() {
            if is_reserved(key) {
                continue;
            }
            explicit_mention |= key == MENTION_TYPE;
            props.set(key, value);
        }

        props.overlay(&blob);
        if !explicit_mention {
            apply_mention_default(&mut props);
        }
        Ok(props)
    }
}

fn is_reserved(key: &str) -> bool {
    key.eq_ignore_ascii_case(PROPERTIES_KEY) || key.eq_ignore_ascii_case(PROPS_KEY)
}

fn reserved_blob(raw: &RawParameters) -> Option<&str> {
    raw.get_ignore_case(PROPERTIES_KEY)
        .or_else(|| raw.get_ignore_case(PROPS_KEY))
}

/// Dependency-based mention detection is only needed when no constituency
/// parse is computed. Called only when no request source named `mention.type`.
fn apply_mention_default(props: &mut Properties) {
    if props.options().has_annotator(PARSE_ANNOTATOR) {
        props.remove(MENTION_TYPE);
    } else if !props.contains_key(MENTION_TYPE) {
        props.set(MENTION_TYPE, DEPENDENCY_MENTION_TYPE);
    }
}
