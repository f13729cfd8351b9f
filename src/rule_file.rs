//! Rule file parsing
//!
//! A rule file is an XML document with a `rule` element carrying
//! `name`/`message` attributes, a `description`, the query under
//! `properties/property[@name='query']/value`, and any number of `example`
//! elements holding annotated source text.
//!
//! Example text is kept verbatim (text and CDATA concatenated) so that line
//! N of an example sits on rule-file line `start_line + N - 1`.

use crate::markers::{block_code, extract_markers, Marker, TestType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Property names that hold the rule query
const QUERY_PROPERTIES: &[&str] = &["query", "xpath"];

#[derive(Error, Debug)]
pub enum RuleFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("XML error in {path} at line {line}: {message}")]
    Xml {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Rule-level data, all optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub rule_name: Option<String>,
    pub message: Option<String>,
    pub description: Option<String>,
    pub query: Option<String>,
}

/// One `<example>` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// 1-based position among the rule's examples
    pub index: usize,
    pub content: String,
    /// Rule-file line on which the example text starts
    pub start_line: usize,
    /// Code lines attributed to violation markers
    pub violations: Vec<String>,
    /// Code lines attributed to valid markers
    pub valids: Vec<String>,
    pub violation_markers: Vec<Marker>,
    pub valid_markers: Vec<Marker>,
}

impl Example {
    pub fn new(index: usize, content: &str, start_line: usize, query: Option<&str>) -> Self {
        let markers = extract_markers(content, query);
        let code_of = |markers: &[Marker]| -> Vec<String> {
            markers
                .iter()
                .flat_map(|m| {
                    block_code(content, m.line_number)
                        .lines()
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        Self {
            index,
            content: content.to_string(),
            start_line,
            violations: code_of(&markers.violation_markers),
            valids: code_of(&markers.valid_markers),
            violation_markers: markers.violation_markers,
            valid_markers: markers.valid_markers,
        }
    }

    pub fn markers(&self, test_type: TestType) -> &[Marker] {
        match test_type {
            TestType::Violation => &self.violation_markers,
            TestType::Valid => &self.valid_markers,
        }
    }

    pub fn has_markers(&self, test_type: TestType) -> bool {
        !self.markers(test_type).is_empty()
    }

    /// Code covered by all markers of one kind
    pub fn section_content(&self, test_type: TestType) -> String {
        self.markers(test_type)
            .iter()
            .map(|m| block_code(&self.content, m.line_number))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rule-file line of an example line
    pub fn rule_file_line(&self, example_line: usize) -> usize {
        self.start_line + example_line.saturating_sub(1)
    }
}

/// A parsed rule file
#[derive(Debug, Clone)]
pub struct RuleFile {
    pub path: PathBuf,
    pub metadata: RuleMetadata,
    pub examples: Vec<Example>,
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<Self, RuleFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| RuleFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, RuleFileError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let pos_to_line = |pos: u64| -> usize {
            let pos = pos as usize;
            line_starts.partition_point(|&start| start <= pos.saturating_sub(1)).max(1)
        };

        let mut metadata = RuleMetadata::default();
        let mut stack: Vec<String> = Vec::new();
        let mut in_rule = false;
        let mut in_query_property = false;
        let mut description = String::new();
        let mut query = String::new();
        let mut current_example: Option<(usize, String)> = None;
        let mut raw_examples: Vec<(usize, String)> = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| RuleFileError::Xml {
                path: path.to_path_buf(),
                line: pos_to_line(reader.buffer_position()),
                message: e.to_string(),
            })?;

            match event {
                Event::Start(e) => {
                    let name = local_name(&e);
                    match name.as_str() {
                        "rule" if !in_rule && metadata.rule_name.is_none() => {
                            in_rule = true;
                            metadata.rule_name = attribute(&e, "name");
                            metadata.message = attribute(&e, "message");
                        }
                        "property" => {
                            in_query_property = is_query_property(&e);
                            if in_query_property {
                                if let Some(value) = attribute(&e, "value") {
                                    query.push_str(&value);
                                }
                            }
                        }
                        "example" if in_rule => {
                            current_example =
                                Some((pos_to_line(reader.buffer_position()), String::new()));
                        }
                        _ => {}
                    }
                    stack.push(name);
                }

                Event::Empty(e) => match local_name(&e).as_str() {
                    "property" if in_rule && is_query_property(&e) => {
                        if let Some(value) = attribute(&e, "value") {
                            query.push_str(&value);
                        }
                    }
                    "example" if in_rule => {
                        raw_examples.push((pos_to_line(reader.buffer_position()), String::new()));
                    }
                    _ => {}
                },

                Event::End(_) => {
                    match stack.pop().as_deref() {
                        Some("example") => {
                            if let Some(example) = current_example.take() {
                                raw_examples.push(example);
                            }
                        }
                        Some("property") => in_query_property = false,
                        Some("rule") => in_rule = false,
                        _ => {}
                    }
                }

                Event::Text(e) => {
                    let text = e.unescape().map_err(|err| RuleFileError::Xml {
                        path: path.to_path_buf(),
                        line: pos_to_line(reader.buffer_position()),
                        message: err.to_string(),
                    })?;
                    append_text(
                        &stack,
                        in_query_property,
                        &text,
                        &mut description,
                        &mut query,
                        &mut current_example,
                    );
                }

                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e).to_string();
                    append_text(
                        &stack,
                        in_query_property,
                        &text,
                        &mut description,
                        &mut query,
                        &mut current_example,
                    );
                }

                Event::Eof => break,

                _ => {}
            }
            buf.clear();
        }

        metadata.description = non_empty(&description);
        metadata.query = non_empty(&query);

        let examples = raw_examples
            .into_iter()
            .enumerate()
            .map(|(i, (start_line, text))| {
                Example::new(i + 1, &text, start_line, metadata.query.as_deref())
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            examples,
        })
    }
}

/// Route character data by the open element path
fn append_text(
    stack: &[String],
    in_query_property: bool,
    text: &str,
    description: &mut String,
    query: &mut String,
    current_example: &mut Option<(usize, String)>,
) {
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());
    match stack.last().map(String::as_str) {
        Some("example") => {
            if let Some((_, content)) = current_example.as_mut() {
                content.push_str(text);
            }
        }
        Some("description") if parent == Some("rule") => description.push_str(text),
        Some("value") if in_query_property => query.push_str(text),
        _ => {}
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key.as_bytes())
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn is_query_property(e: &BytesStart) -> bool {
    attribute(e, "name")
        .map(|name| QUERY_PROPERTIES.contains(&name.as_str()))
        .unwrap_or(false)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Rule-file line range `(open, close)` of the example with the given
/// 1-based ordinal, found textually
///
/// `open` is the line holding `<example`, `close` the line holding the
/// matching `</example>`.
pub fn example_bounds(text: &str, ordinal: usize) -> Option<(usize, usize)> {
    if ordinal == 0 {
        return None;
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut seen = 0;
    let mut open = None;

    for (i, line) in lines.iter().enumerate() {
        if open.is_none() {
            if opens_example(line) {
                seen += 1;
                if seen == ordinal {
                    open = Some(i + 1);
                    if line.contains("</example>") || line.trim_end().ends_with("/>") {
                        return Some((i + 1, i + 1));
                    }
                }
            }
        } else if line.contains("</example>") {
            return open.map(|o| (o, i + 1));
        }
    }
    None
}

fn opens_example(line: &str) -> bool {
    line.match_indices("<example").any(|(pos, tag)| {
        line[pos + tag.len()..]
            .chars()
            .next()
            .map(|c| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(true)
    })
}
