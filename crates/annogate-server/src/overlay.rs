//! Language-specific option overlays.

use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;

use crate::properties::Properties;
use crate::resources::ResourceLoader;

const OVERLAY_CACHE_CAPACITY: u64 = 64;

/// Supported languages as `(name, code)`; either form selects the overlay.
const LANGUAGES: [(&str, &str); 8] = [
    ("arabic", "ar"),
    ("chinese", "zh"),
    ("english", "en"),
    ("french", "fr"),
    ("german", "de"),
    ("hungarian", "hu"),
    ("italian", "it"),
    ("spanish", "es"),
];

/// Option overrides associated with a language tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageOverlay(Arc<Properties>);

impl LanguageOverlay {
    pub fn new(properties: Properties) -> Self {
        Self(Arc::new(properties))
    }

    pub fn properties(&self) -> &Properties {
        &self.0
    }
}

#[async_trait]
pub trait LanguageOverlays: Send + Sync + 'static {
    /// Overlay for `tag`, or `None` when the tag names no known language.
    async fn overlay_for(&self, tag: &str) -> Option<LanguageOverlay>;
}

/// Resource name of the overlay file for `tag`.
pub fn overlay_resource_name(tag: &str) -> Option<String> {
    let tag = tag.trim();
    LANGUAGES
        .iter()
        .find(|(name, code)| tag.eq_ignore_ascii_case(name) || tag.eq_ignore_ascii_case(code))
        .map(|(name, _)| format!("StanfordCoreNLP-{name}.properties"))
}

/// Overlays read from `.properties` resources and memoised per resource.
pub struct ResourceOverlays {
    loader: Arc<dyn ResourceLoader>,
    cache: Cache<String, LanguageOverlay>,
}

impl ResourceOverlays {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        let cache = Cache::builder()
            .max_capacity(OVERLAY_CACHE_CAPACITY)
            .build();
        Self { loader, cache }
    }

    async fn load(&self, resource: String) -> LanguageOverlay {
        let loader = Arc::clone(&self.loader);
        let name = resource.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&name)).await;
        match loaded {
            Ok(Ok(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                let properties = parse_properties_file(&text);
                tracing::debug!(%resource, entries = properties.len(), "loaded language overlay");
                LanguageOverlay::new(properties)
            }
            Ok(Err(error)) => {
                tracing::error!(%resource, %error, "failed to load language overlay; continuing without it");
                LanguageOverlay::default()
            }
            Err(error) => {
                tracing::error!(%resource, %error, "language overlay task failed");
                LanguageOverlay::default()
            }
        }
    }
}

#[async_trait]
impl LanguageOverlays for ResourceOverlays {
    async fn overlay_for(&self, tag: &str) -> Option<LanguageOverlay> {
        let resource = overlay_resource_name(tag)?;
        if let Some(overlay) = self.cache.get(&resource).await {
            return Some(overlay);
        }
        let overlay = self.load(resource.clone()).await;
        // Failed loads are not memoised.
        if !overlay.properties().is_empty() {
            self.cache.insert(resource, overlay.clone()).await;
        }
        Some(overlay)
    }
}

/// Parse Java `.properties` text.
pub fn parse_properties_file(text: &str) -> Properties {
    let mut props = Properties::new();
    let mut logical = String::new();

    for line in text.lines() {
        let piece = line.trim_start();
        if logical.is_empty()
            && (piece.is_empty() || piece.starts_with('#') || piece.starts_with('!'))
        {
            continue;
        }
        if ends_with_continuation(piece) {
            logical.push_str(&piece[..piece.len() - 1]);
            continue;
        }
        logical.push_str(piece);
        if let Some((key, value)) = split_entry(&logical) {
            props.set(key, value);
        }
        logical.clear();
    }
    if !logical.is_empty()
        && let Some((key, value)) = split_entry(&logical)
    {
        props.set(key, value);
    }
    props
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.bytes().rev().take_while(|b| *b == b'\\').count();
    trailing % 2 == 1
}

fn split_entry(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    push_escaped(&mut key, escaped, &mut chars);
                }
            }
            '=' | ':' => break,
            c if c.is_whitespace() => {
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                if chars.peek().is_some_and(|c| *c == '=' || *c == ':') {
                    chars.next();
                }
                break;
            }
            c => key.push(c),
        }
    }

    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }

    let mut value = String::new();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                push_escaped(&mut value, escaped, &mut chars);
            }
        } else {
            value.push(ch);
        }
    }

    if key.is_empty() {
        return None;
    }
    Some((key, value.trim_end().to_string()))
}

fn push_escaped<I>(out: &mut String, escaped: char, rest: &mut std::iter::Peekable<I>)
where
    I: Iterator<Item = char>,
{
    match escaped {
        't' => out.push('\t'),
        'n' => out.push('\n'),
        'r' => out.push('\r'),
        'f' => out.push('\u{000C}'),
        'u' => {
            let digits: String = rest.by_ref().take(4).collect();
            match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                Some(decoded) => out.push(decoded),
                None => {
                    out.push('u');
                    out.push_str(&digits);
                }
            }
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MemoryResources;

    #[test]
    fn tag_matches_name_or_code() {
        assert_eq!(
            overlay_resource_name("FR").as_deref(),
            Some("StanfordCoreNLP-french.properties")
        );
        assert_eq!(
            overlay_resource_name("chinese").as_deref(),
            Some("StanfordCoreNLP-chinese.properties")
        );
        assert_eq!(overlay_resource_name("klingon"), None);
    }

    #[test]
    fn properties_file_syntax() {
        let text = "# comment\n! also comment\n\nannotators = tokenize, ssplit, \\\n    pos\nkey:value\nspaced   value  \nunicode=caf\\u00e9\nescaped\\=key=1\n";
        let props = parse_properties_file(text);
        assert_eq!(props.get("annotators"), Some("tokenize, ssplit, pos"));
        assert_eq!(props.get("key"), Some("value"));
        assert_eq!(props.get("spaced"), Some("value"));
        assert_eq!(props.get("unicode"), Some("café"));
        assert_eq!(props.get("escaped=key"), Some("1"));
        assert_eq!(props.len(), 5);
    }

    #[tokio::test]
    async fn unknown_tag_yields_none() {
        let overlays = ResourceOverlays::new(Arc::new(MemoryResources::new()));
        assert!(overlays.overlay_for("klingon").await.is_none());
    }

    #[tokio::test]
    async fn missing_resource_yields_empty_overlay() {
        let overlays = ResourceOverlays::new(Arc::new(MemoryResources::new()));
        let overlay = overlays.overlay_for("de").await.expect("known tag");
        assert!(overlay.properties().is_empty());
    }

    #[tokio::test]
    async fn loads_overlay_from_resource() {
        let loader = MemoryResources::new().with(
            "StanfordCoreNLP-spanish.properties",
            "annotators=tokenize,ssplit\ntokenize.language=es\n",
        );
        let overlays = ResourceOverlays::new(Arc::new(loader));
        let overlay = overlays.overlay_for("es").await.expect("known tag");
        assert_eq!(overlay.properties().get("tokenize.language"), Some("es"));
        let again = overlays.overlay_for("spanish").await.expect("known tag");
        assert_eq!(overlay, again);
    }
}
