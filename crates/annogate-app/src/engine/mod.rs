//! Built-in reference engine: regex tokenization and punctuation-driven
//! sentence splitting, rendered in the gateway's three output formats.

mod render;

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, LazyLock};

use annogate_server::{
    Annotation, AnnotationEngine, DynPipeline, EngineError, OutputFormat, Pipeline, Properties,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

pub const TOKENIZE: &str = "tokenize";
pub const SSPLIT: &str = "ssplit";
/// Skip unsupported annotators instead of refusing to build.
pub const LENIENT_OPTION: &str = "basic.lenient";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+(?:['’\-.]\w+)*|\.{3}|[^\w\s]").expect("token regex compiles")
});

static TERMINATORS: &[&str] = &[".", "!", "?", "...", "。", "！", "？", "؟"];
static CLOSERS: &[&str] = &[")", "]", "}", "\"", "'", "”", "’", "»"];

static ABBREVIATIONS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "co",
        "corp", "fig", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept",
        "oct", "nov", "dec", "mt", "gen", "col", "gov", "sen", "rep",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// 1-based position within the sentence.
    pub index: usize,
    pub word: String,
    pub original_text: String,
    pub character_offset_begin: usize,
    pub character_offset_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sentence {
    pub index: usize,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub sentences: Vec<Sentence>,
}

/// Token with character (not byte) offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span<'a> {
    text: &'a str,
    begin: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<Span<'_>> {
    let mut spans = Vec::new();
    let mut byte_cursor = 0;
    let mut char_cursor = 0;
    for found in TOKEN_RE.find_iter(text) {
        char_cursor += text[byte_cursor..found.start()].chars().count();
        let len = found.as_str().chars().count();
        spans.push(Span {
            text: found.as_str(),
            begin: char_cursor,
            end: char_cursor + len,
        });
        char_cursor += len;
        byte_cursor = found.end();
    }
    spans
}

fn split_sentences<'a>(spans: Vec<Span<'a>>) -> Vec<Vec<Span<'a>>> {
    let mut sentences = Vec::new();
    let mut current: Vec<Span<'a>> = Vec::new();
    let mut closing = false;

    for span in spans {
        let attached = current.last().is_some_and(|last| last.end == span.begin);
        if closing && !(attached && CLOSERS.contains(&span.text)) {
            sentences.push(std::mem::take(&mut current));
            closing = false;
        }
        let ends = TERMINATORS.contains(&span.text) && !follows_abbreviation(&current, span.text);
        current.push(span);
        if ends {
            closing = true;
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

fn follows_abbreviation(current: &[Span<'_>], terminator: &str) -> bool {
    if terminator != "." {
        return false;
    }
    current.last().is_some_and(|previous| {
        let lower = previous.text.to_lowercase();
        ABBREVIATIONS.contains(lower.as_str())
            || (previous.text.chars().count() == 1
                && previous.text.chars().all(char::is_uppercase))
    })
}

fn to_sentence(index: usize, spans: Vec<Span<'_>>) -> Sentence {
    let tokens = spans
        .into_iter()
        .enumerate()
        .map(|(position, span)| Token {
            index: position + 1,
            word: span.text.to_string(),
            original_text: span.text.to_string(),
            character_offset_begin: span.begin,
            character_offset_end: span.end,
        })
        .collect();
    Sentence { index, tokens }
}

/// Pipeline built for one resolved configuration.
#[derive(Debug, Clone)]
pub struct BasicPipeline {
    ssplit: bool,
    pretty: bool,
}

impl BasicPipeline {
    pub fn document(&self, text: &str) -> Document {
        let spans = tokenize(text);
        let groups = if self.ssplit {
            split_sentences(spans)
        } else if spans.is_empty() {
            Vec::new()
        } else {
            vec![spans]
        };
        Document {
            sentences: groups
                .into_iter()
                .enumerate()
                .map(|(index, spans)| to_sentence(index, spans))
                .collect(),
        }
    }
}

impl Pipeline for BasicPipeline {
    fn annotate(&self, text: &str) -> Result<Annotation, EngineError> {
        Ok(Annotation::new(text, self.document(text)))
    }

    fn render(
        &self,
        annotation: &Annotation,
        format: OutputFormat,
        out: &mut dyn Write,
    ) -> Result<(), EngineError> {
        let document = annotation
            .document::<Document>()
            .ok_or_else(|| EngineError::new("annotation was not produced by the basic engine"))?;
        match format {
            OutputFormat::Json => render::json(document, self.pretty, out),
            OutputFormat::Xml => render::xml(document, out),
            OutputFormat::Conll => render::conll(document, out),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEngine;

impl BasicEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn pipeline_for(&self, properties: &Properties) -> Result<BasicPipeline, EngineError> {
        let options = properties.options();
        let lenient = options.flag(LENIENT_OPTION);
        let annotators = options.annotators();
        if annotators.is_empty() {
            return Err(EngineError::new("no annotators configured"));
        }

        let mut tokenize = false;
        let mut ssplit = false;
        for name in annotators {
            match name {
                TOKENIZE => tokenize = true,
                SSPLIT if !tokenize => {
                    return Err(EngineError::new("annotator `ssplit` requires `tokenize`"));
                }
                SSPLIT => ssplit = true,
                other if lenient => {
                    tracing::warn!(annotator = other, "skipping unsupported annotator");
                }
                other => {
                    return Err(EngineError::new(format!(
                        "unsupported annotator `{other}` (set {LENIENT_OPTION}=true to skip)"
                    )));
                }
            }
        }
        if !tokenize {
            return Err(EngineError::new("annotator `tokenize` is required"));
        }

        Ok(BasicPipeline {
            ssplit,
            pretty: options.pretty_print(),
        })
    }
}

#[async_trait]
impl AnnotationEngine for BasicEngine {
    async fn build(&self, properties: &Properties) -> Result<DynPipeline, EngineError> {
        let pipeline = self.pipeline_for(properties)?;
        tracing::debug!(ssplit = pipeline.ssplit, pretty = pipeline.pretty, "basic pipeline ready");
        Ok(Arc::new(pipeline))
    }
}
