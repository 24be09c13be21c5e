use std::io::Write;

use annogate_server::EngineError;

use super::Document;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const CONLL_EMPTY: &str = "_";

pub(super) fn json(
    document: &Document,
    pretty: bool,
    out: &mut dyn Write,
) -> Result<(), EngineError> {
    let written = if pretty {
        serde_json::to_writer_pretty(&mut *out, document)
    } else {
        serde_json::to_writer(&mut *out, document)
    };
    written.map_err(|error| EngineError::new(format!("json serialisation failed: {error}")))?;
    if pretty {
        writeln!(out)?;
    }
    Ok(())
}

pub(super) fn xml(document: &Document, out: &mut dyn Write) -> Result<(), EngineError> {
    writeln!(out, "{XML_HEADER}")?;
    writeln!(out, "<root>")?;
    writeln!(out, "  <document>")?;
    writeln!(out, "    <sentences>")?;
    for sentence in &document.sentences {
        writeln!(out, r#"      <sentence id="{}">"#, sentence.index + 1)?;
        writeln!(out, "        <tokens>")?;
        for token in &sentence.tokens {
            writeln!(out, r#"          <token id="{}">"#, token.index)?;
            writeln!(out, "            <word>{}</word>", escape_xml(&token.word))?;
            writeln!(
                out,
                "            <CharacterOffsetBegin>{}</CharacterOffsetBegin>",
                token.character_offset_begin
            )?;
            writeln!(
                out,
                "            <CharacterOffsetEnd>{}</CharacterOffsetEnd>",
                token.character_offset_end
            )?;
            writeln!(out, "          </token>")?;
        }
        writeln!(out, "        </tokens>")?;
        writeln!(out, "      </sentence>")?;
    }
    writeln!(out, "    </sentences>")?;
    writeln!(out, "  </document>")?;
    writeln!(out, "</root>")?;
    Ok(())
}

/// One token per line (index, word, then unset columns), sentences separated
/// by a blank line.
pub(super) fn conll(document: &Document, out: &mut dyn Write) -> Result<(), EngineError> {
    for (position, sentence) in document.sentences.iter().enumerate() {
        if position > 0 {
            writeln!(out)?;
        }
        for token in &sentence.tokens {
            writeln!(
                out,
                "{}\t{}\t{CONLL_EMPTY}\t{CONLL_EMPTY}\t{CONLL_EMPTY}\t{CONLL_EMPTY}\t{CONLL_EMPTY}",
                token.index,
                token.word.replace(char::is_whitespace, "_"),
            )?;
        }
    }
    Ok(())
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use annogate_server::Properties;
    use serde_json::Value;

    use super::*;
    use crate::engine::BasicEngine;

    fn document(text: &str) -> Document {
        let props: Properties = [("annotators", "tokenize,ssplit")].into_iter().collect();
        BasicEngine
            .pipeline_for(&props)
            .expect("builds")
            .document(text)
    }

    fn render_with(
        render: impl FnOnce(&mut dyn Write) -> Result<(), EngineError>,
    ) -> String {
        let mut out = Vec::new();
        render(&mut out).expect("renders");
        String::from_utf8(out).expect("utf-8")
    }

    #[test]
    fn json_uses_camel_case_offsets() {
        let doc = document("Hi <you>.");
        let text = render_with(|out| json(&doc, false, out));
        assert!(!text.contains('\n'));
        let value: Value = serde_json::from_str(&text).expect("valid json");
        let first = &value["sentences"][0]["tokens"][0];
        assert_eq!(first["word"], "Hi");
        assert_eq!(first["characterOffsetBegin"], 0);
        assert_eq!(first["characterOffsetEnd"], 2);
    }

    #[test]
    fn xml_escapes_markup() {
        let doc = document("Hi <you>.");
        let text = render_with(|out| xml(&doc, out));
        assert!(text.starts_with(XML_HEADER));
        assert!(text.contains("<word>&lt;</word>"));
        assert!(text.contains(r#"<sentence id="1">"#));
        assert!(text.trim_end().ends_with("</root>"));
    }

    #[test]
    fn conll_separates_sentences() {
        let doc = document("One. Two.");
        let text = render_with(|out| conll(&doc, out));
        assert_eq!(
            text,
            "1\tOne\t_\t_\t_\t_\t_\n2\t.\t_\t_\t_\t_\t_\n\n1\tTwo\t_\t_\t_\t_\t_\n2\t.\t_\t_\t_\t_\t_\n"
        );
    }
}
