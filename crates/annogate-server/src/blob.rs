//! Decoding of the `properties` / `props` query blob.
//!
//! The blob arrives already form-decoded once by the query parser and is then
//! percent-decoded a second time, strictly, before being split into pairs.

use thiserror::Error;

use crate::properties::Properties;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("malformed percent escape at byte {offset}")]
    MalformedEscape { offset: usize },
    #[error("decoded blob is not valid UTF-8")]
    InvalidUtf8,
}

/// Decode a URL-encoded `key=value` blob into properties.
pub fn decode_blob(raw: &str) -> Result<Properties, BlobError> {
    let decoded = percent_decode_strict(raw)?;
    Ok(parse_pairs(&decoded))
}

/// Percent-decode `input`, treating `+` as a space.
///
/// A `%` must be followed by two hex digits; anything else is rejected rather
/// than passed through.
pub fn percent_decode_strict(input: &str) -> Result<String, BlobError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'+' => {
                out.push(b' ');
                idx += 1;
            }
            b'%' => {
                let hi = bytes.get(idx + 1).copied().and_then(hex_value);
                let lo = bytes.get(idx + 2).copied().and_then(hex_value);
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(BlobError::MalformedEscape { offset: idx });
                };
                out.push((hi << 4) | lo);
                idx += 3;
            }
            other => {
                out.push(other);
                idx += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| BlobError::InvalidUtf8)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Split decoded blob text into properties.
///
/// Entries are separated by `;` or `&`. A blob wrapped in `{ }` is read as a
/// loose object literal, where `,` also separates entries and `:` may replace
/// `=`. Quotes protect delimiters and are stripped; `\` escapes one character.
pub fn parse_pairs(text: &str) -> Properties {
    let trimmed = text.trim();
    let (body, braced) = match trimmed.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let mut props = Properties::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut quote: Option<char> = None;
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        let target = if in_value { &mut value } else { &mut key };
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                target.push(escaped);
            }
            continue;
        }
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            } else {
                target.push(ch);
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            ';' | '&' => flush_entry(&mut props, &mut key, &mut value, &mut in_value),
            ',' if braced => flush_entry(&mut props, &mut key, &mut value, &mut in_value),
            '=' if !in_value => in_value = true,
            ':' if braced && !in_value => in_value = true,
            _ => target.push(ch),
        }
    }
    flush_entry(&mut props, &mut key, &mut value, &mut in_value);
    props
}

fn flush_entry(props: &mut Properties, key: &mut String, value: &mut String, in_value: &mut bool) {
    let name = key.trim();
    if !name.is_empty() {
        props.set(name, value.trim());
    }
    key.clear();
    value.clear();
    *in_value = false;
}
