//! Document parsing: format sniffing, frontmatter stripping, stable
//! sectioning, title derivation, and content fingerprints.
//!
//! Sectioning is format-dependent:
//! - **Markdown**: one section per heading at the first nontrivial depth
//!   (the shallowest depth with more than one heading).
//! - **JSON / YAML**: one section per top-level object key.
//! - **Text**: one section per blank-line-delimited paragraph.

use crate::models::DocumentFormat;
use crate::{Error, Result};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// A section produced by the parser, before it receives a store identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    /// Heading text, empty for preamble and paragraph sections.
    pub header: String,
    /// Section body, heading line excluded.
    pub content: String,
    /// Heading depth, 0 for headerless sections.
    pub level: u8,
    /// Inclusive 1-based first line in the raw content.
    pub start_line: u32,
    /// Inclusive 1-based last line in the raw content.
    pub end_line: u32,
}

/// The result of parsing a raw document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Derived title.
    pub title: String,
    /// Key-value preface stripped from the source, if any.
    pub frontmatter: BTreeMap<String, JsonValue>,
    /// Stable fingerprint of the post-frontmatter body.
    pub content_hash: String,
    /// The post-frontmatter body.
    pub body: String,
    /// Ordered sections.
    pub sections: Vec<ParsedSection>,
}

/// Computes the stable content fingerprint over a post-frontmatter body.
///
/// Trailing whitespace is normalized away so that editors appending a
/// final newline do not change document identity.
#[must_use]
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.trim_end().as_bytes());
    hex::encode(hasher.finalize())
}

/// Guesses the format of a document from its source path, then content.
#[must_use]
pub fn sniff_format(source_path: Option<&str>, raw: &str) -> DocumentFormat {
    if let Some(path) = source_path {
        match Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("md" | "markdown") => return DocumentFormat::Markdown,
            Some("json") => return DocumentFormat::Json,
            Some("yaml" | "yml") => return DocumentFormat::Yaml,
            Some("txt") => return DocumentFormat::Text,
            _ => {},
        }
    }

    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return DocumentFormat::Json;
    }
    if raw.lines().any(|l| l.starts_with('#')) {
        return DocumentFormat::Markdown;
    }
    DocumentFormat::Text
}

/// Parses raw content into a titled, sectioned document.
///
/// `source_path` only informs title fallback; it is not read.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when structured input (JSON/YAML) is
/// malformed.
pub fn parse(
    raw: &str,
    format: DocumentFormat,
    source_path: Option<&str>,
) -> Result<ParsedDocument> {
    let (frontmatter, body_first_line) = match format {
        DocumentFormat::Markdown | DocumentFormat::Text => split_frontmatter(raw),
        DocumentFormat::Json | DocumentFormat::Yaml => (BTreeMap::new(), 1),
    };
    let body = skip_lines(raw, body_first_line - 1);

    let sections = match format {
        DocumentFormat::Markdown => markdown_sections(&body, body_first_line),
        DocumentFormat::Json => json_sections(&body, raw, body_first_line)?,
        DocumentFormat::Yaml => yaml_sections(&body, raw, body_first_line)?,
        DocumentFormat::Text => text_sections(&body, body_first_line),
    };

    let title = derive_title(format, &body, &sections, source_path);

    Ok(ParsedDocument {
        title,
        frontmatter,
        content_hash: content_hash(&body),
        body,
        sections,
    })
}

/// Reconstructs a markdown/text body from parsed sections.
///
/// Heading lines are re-synthesized from `(level, header)`; joining the
/// result reproduces the parsed body modulo trailing whitespace.
#[must_use]
pub fn reassemble(sections: &[ParsedSection]) -> String {
    let mut parts = Vec::with_capacity(sections.len());
    for section in sections {
        if section.header.is_empty() || section.level == 0 {
            parts.push(section.content.clone());
        } else if section.content.is_empty() {
            parts.push(markdown_heading(section.level, &section.header));
        } else {
            parts.push(format!(
                "{}\n{}",
                markdown_heading(section.level, &section.header),
                section.content
            ));
        }
    }
    parts.join("\n")
}

/// Renders a markdown heading line.
#[must_use]
pub fn markdown_heading(level: u8, header: &str) -> String {
    let depth = usize::from(level.clamp(1, 6));
    format!("{} {header}", "#".repeat(depth))
}

/// Removes HTML comments (e.g. source annotations) from text.
///
/// Embedding and matching treat comments as non-content so an annotated
/// copy of a section compares equal to its plain original.
#[must_use]
pub fn strip_html_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Strips a leading YAML frontmatter block.
///
/// Returns the parsed mapping and the 1-based line number where the body
/// begins. Inputs without a recognized preface return an empty mapping
/// and line 1.
fn split_frontmatter(raw: &str) -> (BTreeMap<String, JsonValue>, u32) {
    let mut lines = raw.lines();
    if lines.next().map(str::trim_end) != Some("---") {
        return (BTreeMap::new(), 1);
    }

    let mut block = Vec::new();
    let mut consumed = 1_u32;
    for line in lines {
        consumed += 1;
        if line.trim_end() == "---" {
            let text = block.join("\n");
            let Ok(value) = serde_yaml_ng::from_str::<serde_yaml_ng::Value>(&text) else {
                return (BTreeMap::new(), 1);
            };
            let Ok(JsonValue::Object(map)) = serde_json::to_value(&value) else {
                return (BTreeMap::new(), 1);
            };
            let frontmatter = map.into_iter().collect();
            return (frontmatter, consumed + 1);
        }
        block.push(line);
    }

    // Unterminated preface: treat everything as body.
    (BTreeMap::new(), 1)
}

/// Returns the input with its first `n` lines removed.
fn skip_lines(raw: &str, n: u32) -> String {
    if n == 0 {
        return raw.to_string();
    }
    raw.lines()
        .skip(n as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A heading found in a markdown body.
struct Heading {
    line_idx: usize,
    level: u8,
    text: String,
}

fn find_headings(lines: &[&str]) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let hashes = line.chars().take_while(|&c| c == '#').count();
        if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
            headings.push(Heading {
                line_idx: idx,
                level: u8::try_from(hashes).unwrap_or(6),
                text: line[hashes + 1..].trim().to_string(),
            });
        }
    }
    headings
}

/// The first nontrivial sectioning depth: the shallowest heading level
/// that occurs more than once, falling back to the shallowest present.
fn sectioning_level(headings: &[Heading]) -> Option<u8> {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for h in headings {
        *counts.entry(h.level).or_default() += 1;
    }
    counts
        .iter()
        .find(|&(_, &count)| count > 1)
        .map(|(&level, _)| level)
        .or_else(|| counts.keys().next().copied())
}

#[allow(clippy::cast_possible_truncation)]
fn markdown_sections(body: &str, first_line: u32) -> Vec<ParsedSection> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = body.lines().collect();
    let headings = find_headings(&lines);
    let Some(level) = sectioning_level(&headings) else {
        // No headings at all: the whole body is one section.
        return vec![ParsedSection {
            header: String::new(),
            content: body.to_string(),
            level: 0,
            start_line: first_line,
            end_line: first_line + lines.len().saturating_sub(1) as u32,
        }];
    };

    let cut_points: Vec<&Heading> = headings.iter().filter(|h| h.level == level).collect();
    let mut sections = Vec::new();

    // Preamble before the first sectioning heading (often the H1 title).
    let first_cut = cut_points[0].line_idx;
    if lines[..first_cut].iter().any(|l| !l.trim().is_empty()) {
        sections.push(ParsedSection {
            header: String::new(),
            content: lines[..first_cut].join("\n"),
            level: 0,
            start_line: first_line,
            end_line: first_line + first_cut.saturating_sub(1) as u32,
        });
    }

    for (i, heading) in cut_points.iter().enumerate() {
        let span_end = cut_points
            .get(i + 1)
            .map_or(lines.len(), |next| next.line_idx);
        let content = lines[heading.line_idx + 1..span_end].join("\n");
        sections.push(ParsedSection {
            header: heading.text.clone(),
            content,
            level,
            start_line: first_line + heading.line_idx as u32,
            end_line: first_line + span_end.saturating_sub(1) as u32,
        });
    }

    sections
}

#[allow(clippy::cast_possible_truncation)]
fn text_sections(body: &str, first_line: u32) -> Vec<ParsedSection> {
    let lines: Vec<&str> = body.lines().collect();
    let mut sections = Vec::new();
    let mut para_start: Option<usize> = None;

    for idx in 0..=lines.len() {
        let blank = idx == lines.len() || lines[idx].trim().is_empty();
        match (blank, para_start) {
            (false, None) => para_start = Some(idx),
            (true, Some(start)) => {
                sections.push(ParsedSection {
                    header: String::new(),
                    content: lines[start..idx].join("\n"),
                    level: 0,
                    start_line: first_line + start as u32,
                    end_line: first_line + idx.saturating_sub(1) as u32,
                });
                para_start = None;
            },
            _ => {},
        }
    }

    sections
}

/// Locates the 1-based line of a key's first occurrence in the raw text.
fn key_line(raw: &str, needle: &str) -> Option<u32> {
    raw.lines()
        .position(|l| l.contains(needle))
        .and_then(|idx| u32::try_from(idx + 1).ok())
}

#[allow(clippy::cast_possible_truncation)]
fn json_sections(body: &str, raw: &str, first_line: u32) -> Result<Vec<ParsedSection>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| Error::InvalidInput(format!("malformed JSON: {e}")))?;

    let JsonValue::Object(map) = value else {
        let total = body.lines().count().max(1) as u32;
        return Ok(vec![ParsedSection {
            header: String::new(),
            content: body.trim().to_string(),
            level: 0,
            start_line: first_line,
            end_line: first_line + total - 1,
        }]);
    };

    object_sections(
        map.into_iter()
            .map(|(k, v)| {
                let rendered = serde_json::to_string_pretty(&v)
                    .map_err(|e| Error::internal("render_json_section", e))?;
                Ok((k, rendered))
            })
            .collect::<Result<Vec<_>>>()?,
        raw,
        first_line,
        |key| format!("\"{key}\""),
    )
}

#[allow(clippy::cast_possible_truncation)]
fn yaml_sections(body: &str, raw: &str, first_line: u32) -> Result<Vec<ParsedSection>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(body)
        .map_err(|e| Error::InvalidInput(format!("malformed YAML: {e}")))?;

    let serde_yaml_ng::Value::Mapping(map) = value else {
        let total = body.lines().count().max(1) as u32;
        return Ok(vec![ParsedSection {
            header: String::new(),
            content: body.trim().to_string(),
            level: 0,
            start_line: first_line,
            end_line: first_line + total - 1,
        }]);
    };

    object_sections(
        map.into_iter()
            .map(|(k, v)| {
                let key = match k {
                    serde_yaml_ng::Value::String(s) => s,
                    other => serde_yaml_ng::to_string(&other)
                        .map_err(|e| Error::internal("render_yaml_key", e))?
                        .trim()
                        .to_string(),
                };
                let rendered = serde_yaml_ng::to_string(&v)
                    .map_err(|e| Error::internal("render_yaml_section", e))?
                    .trim_end()
                    .to_string();
                Ok((key, rendered))
            })
            .collect::<Result<Vec<_>>>()?,
        raw,
        first_line,
        |key| format!("{key}:"),
    )
}

/// Builds sections for object-keyed formats, ordered by the key's
/// position in the raw text so section order follows the source.
#[allow(clippy::cast_possible_truncation)]
fn object_sections(
    entries: Vec<(String, String)>,
    raw: &str,
    first_line: u32,
    needle: impl Fn(&str) -> String,
) -> Result<Vec<ParsedSection>> {
    let raw_total = raw.lines().count().max(1) as u32;
    let mut located: Vec<(u32, String, String)> = entries
        .into_iter()
        .map(|(key, content)| {
            let line = key_line(raw, &needle(&key)).unwrap_or(first_line);
            (line, key, content)
        })
        .collect();
    located.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut sections = Vec::with_capacity(located.len());
    for (i, (line, key, content)) in located.iter().enumerate() {
        let end_line = located
            .get(i + 1)
            .map_or(raw_total, |(next_line, _, _)| next_line.saturating_sub(1))
            .max(*line);
        sections.push(ParsedSection {
            header: key.clone(),
            content: content.clone(),
            level: 1,
            start_line: *line,
            end_line,
        });
    }
    Ok(sections)
}

fn derive_title(
    format: DocumentFormat,
    body: &str,
    sections: &[ParsedSection],
    source_path: Option<&str>,
) -> String {
    match format {
        DocumentFormat::Markdown => {
            let lines: Vec<&str> = body.lines().collect();
            if let Some(h1) = find_headings(&lines).iter().find(|h| h.level == 1) {
                return h1.text.clone();
            }
        },
        DocumentFormat::Json | DocumentFormat::Yaml => {
            if let Some(section) = sections.iter().find(|s| s.header == "title") {
                let cleaned = section.content.trim().trim_matches('"').to_string();
                if !cleaned.is_empty() {
                    return cleaned;
                }
            }
        },
        DocumentFormat::Text => {},
    }

    source_path
        .and_then(|p| Path::new(p).file_stem().and_then(|s| s.to_str()))
        .map_or_else(|| "untitled".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const DOC: &str = "\
# Service Guide
Intro paragraph.

## Retry Policy
The service retries 3 times.

## Timeouts
Requests time out after 30s.
";

    #[test]
    fn test_markdown_sectioning_at_first_nontrivial_depth() {
        let parsed = parse(DOC, DocumentFormat::Markdown, Some("guide.md")).unwrap();
        assert_eq!(parsed.title, "Service Guide");
        // Preamble (H1 + intro) plus the two H2 sections.
        assert_eq!(parsed.sections.len(), 3);
        assert_eq!(parsed.sections[0].header, "");
        assert_eq!(parsed.sections[1].header, "Retry Policy");
        assert_eq!(parsed.sections[1].level, 2);
        assert_eq!(parsed.sections[2].header, "Timeouts");
    }

    #[test]
    fn test_markdown_round_trip() {
        let parsed = parse(DOC, DocumentFormat::Markdown, None).unwrap();
        assert_eq!(
            reassemble(&parsed.sections).trim_end(),
            parsed.body.trim_end()
        );
    }

    #[test]
    fn test_section_line_numbers() {
        let parsed = parse(DOC, DocumentFormat::Markdown, None).unwrap();
        let retry = &parsed.sections[1];
        assert_eq!(retry.start_line, 4);
        assert_eq!(retry.end_line, 6);
    }

    #[test]
    fn test_frontmatter_stripped_and_lines_offset() {
        let doc = "---\nauthor: ops\nversion: 2\n---\n# Title\n\n## One\na\n\n## Two\nb\n";
        let parsed = parse(doc, DocumentFormat::Markdown, None).unwrap();
        assert_eq!(
            parsed.frontmatter.get("author").and_then(|v| v.as_str()),
            Some("ops")
        );
        assert_eq!(parsed.sections[1].header, "One");
        // Line numbers index into the raw content, frontmatter included.
        assert_eq!(parsed.sections[1].start_line, 7);
    }

    #[test]
    fn test_stable_hash_ignores_frontmatter() {
        let with = "---\na: 1\n---\n# T\nbody\n";
        let without = "# T\nbody\n";
        let p1 = parse(with, DocumentFormat::Markdown, None).unwrap();
        let p2 = parse(without, DocumentFormat::Markdown, None).unwrap();
        assert_eq!(p1.content_hash, p2.content_hash);
    }

    #[test]
    fn test_headings_inside_fences_ignored() {
        let doc = "## Real\n```\n## not a heading\n```\n\n## Also Real\nx\n";
        let parsed = parse(doc, DocumentFormat::Markdown, None).unwrap();
        let headers: Vec<&str> = parsed.sections.iter().map(|s| s.header.as_str()).collect();
        assert_eq!(headers, vec!["Real", "Also Real"]);
    }

    #[test]
    fn test_strip_html_comments() {
        let text = "body text\n\n<!-- sources: abc -->\nmore";
        assert_eq!(strip_html_comments(text), "body text\n\n\nmore");
        assert_eq!(strip_html_comments("no comments"), "no comments");
        assert_eq!(strip_html_comments("<!-- unterminated"), "");
    }

    #[test]
    fn test_whitespace_only_input() {
        let parsed = parse("  \n\n  ", DocumentFormat::Markdown, Some("empty.md")).unwrap();
        assert!(parsed.sections.is_empty());
        assert_eq!(parsed.title, "empty");
    }

    #[test]
    fn test_json_object_sections() {
        let doc = "{\n  \"title\": \"Config Spec\",\n  \"retries\": {\"count\": 3},\n  \"timeout\": 30\n}";
        let parsed = parse(doc, DocumentFormat::Json, None).unwrap();
        assert_eq!(parsed.title, "Config Spec");
        assert_eq!(parsed.sections.len(), 3);
        // Sections follow source order, not key order.
        assert_eq!(parsed.sections[0].header, "title");
        assert_eq!(parsed.sections[1].header, "retries");
        assert!(parsed.sections[1].content.contains("\"count\": 3"));
    }

    #[test]
    fn test_malformed_json_is_invalid_input() {
        let err = parse("{not json", DocumentFormat::Json, None).unwrap_err();
        assert_eq!(err.error_code(), "InvalidInput");
    }

    #[test]
    fn test_yaml_mapping_sections() {
        let doc = "retries:\n  count: 5\ntimeout: 30\n";
        let parsed = parse(doc, DocumentFormat::Yaml, None).unwrap();
        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.sections[0].header, "retries");
        assert!(parsed.sections[0].content.contains("count: 5"));
    }

    #[test]
    fn test_text_paragraphs() {
        let doc = "First paragraph\nspanning two lines.\n\nSecond paragraph.\n";
        let parsed = parse(doc, DocumentFormat::Text, Some("notes.txt")).unwrap();
        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.sections[0].start_line, 1);
        assert_eq!(parsed.sections[0].end_line, 2);
        assert_eq!(parsed.sections[1].start_line, 4);
        assert_eq!(parsed.title, "notes");
    }

    #[test_case(None, "{\"a\": 1}", DocumentFormat::Json; "json content")]
    #[test_case(Some("x.yml"), "a: 1", DocumentFormat::Yaml; "yaml extension")]
    #[test_case(Some("x.md"), "hello", DocumentFormat::Markdown; "md extension")]
    #[test_case(None, "plain words", DocumentFormat::Text; "plain text")]
    fn test_sniff_format(path: Option<&str>, raw: &str, expected: DocumentFormat) {
        assert_eq!(sniff_format(path, raw), expected);
    }

    proptest! {
        /// Parsing then reassembling markdown reproduces the body for
        /// arbitrary heading/paragraph mixes.
        #[test]
        fn prop_markdown_round_trip(
            headers in proptest::collection::vec("[A-Za-z][A-Za-z ]{0,12}", 2..6),
            bodies in proptest::collection::vec("[a-z ]{0,40}", 2..6),
        ) {
            let mut doc = String::new();
            for (h, b) in headers.iter().zip(bodies.iter()) {
                doc.push_str(&format!("## {}\n{}\n", h.trim(), b));
            }
            let parsed = parse(&doc, DocumentFormat::Markdown, None).unwrap();
            let reassembled = reassemble(&parsed.sections);
            prop_assert_eq!(
                reassembled.trim_end(),
                parsed.body.trim_end()
            );
        }

        /// Hashing is stable and metadata-independent.
        #[test]
        fn prop_stable_hash(body in "[ -~]{0,200}") {
            prop_assert_eq!(content_hash(&body), content_hash(&body));
        }
    }
}
