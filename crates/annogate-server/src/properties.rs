//! Option bags flowing from an HTTP request into the annotation engine.
//!
//! [`RawParameters`] is the untyped view of a query string. [`Properties`] is
//! the resolved, immutable configuration; it doubles as the pipeline cache key,
//! so equality and hashing are structural over a sorted map.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const ANNOTATORS: &str = "annotators";
pub const OUTPUT_FORMAT: &str = "outputFormat";
pub const INPUT_FORMAT: &str = "inputFormat";
pub const PRETTY_PRINT: &str = "prettyPrint";
pub const PIPELINE_LANGUAGE: &str = "pipelineLanguage";
pub const MENTION_TYPE: &str = "mention.type";
pub const COREF_MODE: &str = "coref.mode";
pub const COREF_LANGUAGE: &str = "coref.language";
pub const PARSE_MODEL: &str = "parse.model";
pub const PARSE_BINARY_TREES: &str = "parse.binaryTrees";
pub const OPENIE_STRIP_ENTAILMENTS: &str = "openie.strip_entailments";

/// Option names with a fixed spelling, for restoring keys whose case was lost.
pub const KNOWN_OPTIONS: [&str; 11] = [
    ANNOTATORS,
    OUTPUT_FORMAT,
    INPUT_FORMAT,
    PRETTY_PRINT,
    PIPELINE_LANGUAGE,
    MENTION_TYPE,
    COREF_MODE,
    COREF_LANGUAGE,
    PARSE_MODEL,
    PARSE_BINARY_TREES,
    OPENIE_STRIP_ENTAILMENTS,
];

/// Known option spelled `key` ignoring ASCII case, with `_` standing for `.`.
pub fn canonical_option(key: &str) -> Option<&'static str> {
    let wanted = fold_option_name(key);
    KNOWN_OPTIONS
        .into_iter()
        .find(|&option| fold_option_name(option) == wanted)
}

fn fold_option_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch == '.' { '_' } else { ch.to_ascii_lowercase() })
        .collect()
}

/// Language tag that disables overlay lookup.
pub const DEFAULT_LANGUAGE: &str = "default";
/// Annotator whose presence makes dependency-based mention detection unnecessary.
pub const PARSE_ANNOTATOR: &str = "parse";

/// Decoded query parameters in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParameters {
    pairs: Vec<(String, String)>,
}

impl RawParameters {
    /// Decode an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// First value whose key matches `key` ignoring ASCII case.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Distinct keys paired with their first value.
    pub fn first_values(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut seen = HashSet::with_capacity(self.pairs.len());
        self.pairs
            .iter()
            .filter(move |(key, _)| seen.insert(key.as_str()))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawParameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let pairs = iter
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self { pairs }
    }
}

/// Fully resolved option set for one annotation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` over `self`.
    pub fn overlay(&mut self, other: &Properties) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn options(&self) -> PipelineOptions<'_> {
        PipelineOptions { properties: self }
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Properties {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (key, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// Typed accessors over [`Properties`] for the options this layer interprets.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions<'a> {
    properties: &'a Properties,
}

impl<'a> PipelineOptions<'a> {
    /// Annotator names in declaration order, blank entries dropped.
    pub fn annotators(&self) -> Vec<&'a str> {
        self.properties
            .get(ANNOTATORS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_annotator(&self, name: &str) -> bool {
        self.annotators().contains(&name)
    }

    pub fn output_format(&self) -> Option<&'a str> {
        self.properties.get(OUTPUT_FORMAT)
    }

    /// Language tag, `None` when absent or set to the `default` sentinel.
    pub fn pipeline_language(&self) -> Option<&'a str> {
        self.properties
            .get(PIPELINE_LANGUAGE)
            .filter(|tag| *tag != DEFAULT_LANGUAGE)
    }

    pub fn pretty_print(&self) -> bool {
        self.flag(PRETTY_PRINT)
    }

    /// Boolean option; only a case-insensitive `true` counts as set.
    pub fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }
}
