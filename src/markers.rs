//! Marker and section extraction for annotated examples
//!
//! Examples mark expected outcomes in two ways:
//!
//! ```text
//! Integer x = 5; // ❌ magic number      <- inline violation marker
//! Integer y = MAX; // ✅                  <- inline valid marker
//!
//! // Violation: hardcoded id              <- section header, marks the
//! Id i = '001000000000001';                  lines that follow it
//! ```
//!
//! Inline markers win: when an example contains any inline marker, section
//! headers no longer emit markers for that example.

use crate::coverage::nodes::node_type_covered;
use crate::query;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Glyph marking an expected violation
pub const VIOLATION_GLYPH: char = '❌';

/// Glyph marking an expected valid line
pub const VALID_GLYPH: char = '✅';

pub const VIOLATION_HEADER: &str = "// Violation:";
pub const VALID_HEADER: &str = "// Valid:";

/// Description used when a marker carries no text
pub const NO_DESCRIPTION: &str = "No description";

/// Where a marker came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSource {
    Inline,
    Section,
}

/// The two halves of an example test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Violation,
    Valid,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Violation => write!(f, "violation"),
            TestType::Valid => write!(f, "valid"),
        }
    }
}

/// An expected outcome declared in example text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// 1-based line within the example text
    pub line_number: usize,
    pub description: String,
    pub is_violation: bool,
    /// 0-based ordinal among markers of the same kind
    pub index: usize,
    /// Code preceding an inline marker on its line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_span: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associated_node_type: Option<String>,
    pub source: MarkerSource,
}

impl Marker {
    pub fn test_type(&self) -> TestType {
        if self.is_violation {
            TestType::Violation
        } else {
            TestType::Valid
        }
    }
}

/// Markers of one example, split by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMarkers {
    pub violation_markers: Vec<Marker>,
    pub valid_markers: Vec<Marker>,
}

impl ExtractedMarkers {
    pub fn is_empty(&self) -> bool {
        self.violation_markers.is_empty() && self.valid_markers.is_empty()
    }
}

/// Classification of a single example line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Header {
        is_violation: bool,
        description: &'a str,
    },
    Inline {
        is_violation: bool,
        description: &'a str,
        code: Option<&'a str>,
    },
    Comment,
    Blank,
    Code,
}

impl LineKind<'_> {
    fn is_marker(&self) -> bool {
        matches!(self, LineKind::Header { .. } | LineKind::Inline { .. })
    }
}

/// Classify one line of example text
pub fn classify_line(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }

    if let Some(rest) = trimmed.strip_prefix(VIOLATION_HEADER) {
        return LineKind::Header {
            is_violation: true,
            description: rest.trim(),
        };
    }
    if let Some(rest) = trimmed.strip_prefix(VALID_HEADER) {
        return LineKind::Header {
            is_violation: false,
            description: rest.trim(),
        };
    }

    if let Some(comment_start) = find_line_comment(line) {
        let comment = &line[comment_start + 2..];
        let glyph = comment
            .char_indices()
            .find(|(_, c)| *c == VIOLATION_GLYPH || *c == VALID_GLYPH);
        if let Some((pos, c)) = glyph {
            let code = line[..comment_start].trim();
            return LineKind::Inline {
                is_violation: c == VIOLATION_GLYPH,
                description: comment[pos + c.len_utf8()..].trim(),
                code: if code.is_empty() { None } else { Some(code) },
            };
        }
    }

    if is_comment_line(trimmed) {
        LineKind::Comment
    } else {
        LineKind::Code
    }
}

/// Byte offset of a `//` comment outside string literals and block comments
fn find_line_comment(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut in_block = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        if in_block {
            if b == b'*' && next == Some(b'/') {
                in_block = false;
                i += 1;
            }
        } else if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
        } else {
            match (b, next) {
                (b'/', Some(b'/')) => return Some(i),
                (b'/', Some(b'*')) => {
                    in_block = true;
                    i += 1;
                }
                (b'\'' | b'"', _) => quote = Some(b),
                _ => {}
            }
        }
        i += 1;
    }

    None
}

/// Comment-only line (already trimmed)
pub fn is_comment_line(trimmed: &str) -> bool {
    trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
        || trimmed.ends_with("*/")
}

/// Markup line belonging to the rule file rather than the example (already trimmed)
pub fn is_markup_line(trimmed: &str) -> bool {
    trimmed.starts_with('<') || trimmed.starts_with("]]>")
}

/// Extract violation and valid markers from example text
///
/// When `query` is given, markers are annotated with the first node type of
/// the query that their code block plausibly produces.
pub fn extract_markers(text: &str, query: Option<&str>) -> ExtractedMarkers {
    let kinds: Vec<LineKind> = text.lines().map(classify_line).collect();
    let has_inline = kinds.iter().any(|k| matches!(k, LineKind::Inline { .. }));

    let mut markers = ExtractedMarkers::default();

    for (i, kind) in kinds.iter().enumerate() {
        let line_number = i + 1;
        let (is_violation, description, code, source) = match kind {
            LineKind::Header {
                is_violation,
                description,
            } => {
                if has_inline {
                    continue;
                }
                (*is_violation, *description, None, MarkerSource::Section)
            }
            LineKind::Inline {
                is_violation,
                description,
                code,
            } => (*is_violation, *description, *code, MarkerSource::Inline),
            _ => continue,
        };

        let bucket = if is_violation {
            &mut markers.violation_markers
        } else {
            &mut markers.valid_markers
        };
        bucket.push(Marker {
            line_number,
            description: if description.is_empty() {
                NO_DESCRIPTION.to_string()
            } else {
                description.to_string()
            },
            is_violation,
            index: bucket.len(),
            code_span: code.map(String::from),
            associated_node_type: None,
            source,
        });
    }

    if let Some(query) = query {
        annotate_node_types(text, &mut markers, query);
    }

    markers
}

fn annotate_node_types(text: &str, markers: &mut ExtractedMarkers, query: &str) {
    let analysis = query::analyze(Some(query));
    if analysis.node_types.is_empty() {
        return;
    }

    for marker in markers
        .violation_markers
        .iter_mut()
        .chain(markers.valid_markers.iter_mut())
    {
        let code = block_code(text, marker.line_number);
        marker.associated_node_type = analysis
            .node_types
            .iter()
            .find(|t| node_type_covered(t, &code))
            .cloned();
    }
}

/// Line numbers of the code a marker covers
///
/// An inline marker with code on its line covers that line. A comment-only
/// marker or a section header covers the code lines that follow it, up to
/// the next marker.
pub fn marker_block(text: &str, marker_line: usize) -> Vec<usize> {
    let lines: Vec<&str> = text.lines().collect();
    if marker_line == 0 || marker_line > lines.len() {
        return Vec::new();
    }

    if let LineKind::Inline { code: Some(_), .. } = classify_line(lines[marker_line - 1]) {
        return vec![marker_line];
    }

    let mut block = Vec::new();
    for (offset, line) in lines[marker_line..].iter().enumerate() {
        let kind = classify_line(line);
        if kind.is_marker() {
            break;
        }
        if kind == LineKind::Code {
            block.push(marker_line + offset + 1);
        }
    }
    block
}

/// Code text of a marker's block, one line per entry
pub fn block_code(text: &str, marker_line: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    marker_block(text, marker_line)
        .into_iter()
        .filter_map(|n| lines.get(n - 1))
        .map(|line| match classify_line(line) {
            LineKind::Inline { code: Some(code), .. } => code.to_string(),
            _ => line.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_markers() {
        let text = "public class A {\n  Integer x = 5; // ❌ magic number\n  Integer y = MAX; // ✅\n}";
        let markers = extract_markers(text, None);

        assert_eq!(markers.violation_markers.len(), 1);
        assert_eq!(markers.valid_markers.len(), 1);

        let v = &markers.violation_markers[0];
        assert_eq!(v.line_number, 2);
        assert_eq!(v.description, "magic number");
        assert_eq!(v.code_span.as_deref(), Some("Integer x = 5;"));
        assert_eq!(v.source, MarkerSource::Inline);

        let ok = &markers.valid_markers[0];
        assert_eq!(ok.line_number, 3);
        assert_eq!(ok.description, NO_DESCRIPTION);
    }

    #[test]
    fn test_section_markers() {
        let text = "// Violation: hardcoded id\nId i = '001';\n\n// Valid: from query\nId j = acc.Id;";
        let markers = extract_markers(text, None);

        assert_eq!(markers.violation_markers.len(), 1);
        assert_eq!(markers.violation_markers[0].line_number, 1);
        assert_eq!(markers.violation_markers[0].description, "hardcoded id");
        assert_eq!(markers.violation_markers[0].source, MarkerSource::Section);
        assert_eq!(markers.valid_markers[0].line_number, 4);
    }

    #[test]
    fn test_inline_takes_precedence() {
        let text = "// Violation: section text\nInteger x = 5; // ❌\n// Valid: other\nInteger y = 6;";
        let markers = extract_markers(text, None);

        assert_eq!(markers.violation_markers.len(), 1);
        assert_eq!(markers.violation_markers[0].line_number, 2);
        assert!(markers.valid_markers.is_empty());
    }

    #[test]
    fn test_marker_indices_per_kind() {
        let text = "a(); // ❌ one\nb(); // ✅\nc(); // ❌ two\nd(); // ❌ three";
        let markers = extract_markers(text, None);
        let indices: Vec<usize> = markers.violation_markers.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(markers.valid_markers[0].index, 0);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "// Violation: x\nfoo();\n// Valid:\nbar(); // trailing";
        assert_eq!(extract_markers(text, None), extract_markers(text, None));
    }

    #[test]
    fn test_marker_free_and_malformed_text() {
        assert!(extract_markers("", None).is_empty());
        assert!(extract_markers("just code();\n/* comment */", None).is_empty());
        assert_eq!(extract_markers("<<<]]>// ❌", None).violation_markers.len(), 1);
    }

    #[test]
    fn test_glyph_inside_string_is_not_a_marker() {
        let markers = extract_markers("String s = '// ❌';", None);
        assert!(markers.is_empty());
    }

    #[test]
    fn test_apostrophe_in_block_comment() {
        let markers = extract_markers("foo(); /* don't */ // ❌ flagged", None);
        assert_eq!(markers.violation_markers.len(), 1);
        assert_eq!(markers.violation_markers[0].description, "flagged");
        assert_eq!(
            classify_line("foo(); /* don't */ // ❌ flagged"),
            LineKind::Inline {
                is_violation: true,
                description: "flagged",
                code: Some("foo(); /* don't */"),
            }
        );
    }

    #[test]
    fn test_comment_after_escaped_quote() {
        let text = r"String s = 'it\'s // here'; // ✅";
        let markers = extract_markers(text, None);
        assert_eq!(markers.valid_markers.len(), 1);
        assert_eq!(block_code(text, 1), r"String s = 'it\'s // here';");
    }

    #[test]
    fn test_marker_block_inline_with_code() {
        let text = "a();\nb(); // ❌\nc();";
        assert_eq!(marker_block(text, 2), vec![2]);
    }

    #[test]
    fn test_marker_block_comment_only() {
        let text = "// ❌ next line\n\n// helper comment\nfoo();\nbar();\n// ✅\nbaz();";
        assert_eq!(marker_block(text, 1), vec![4, 5]);
        assert_eq!(marker_block(text, 6), vec![7]);
        assert!(marker_block(text, 99).is_empty());
    }

    #[test]
    fn test_block_code_strips_marker_comment() {
        let text = "Integer x = 5; // ❌";
        assert_eq!(block_code(text, 1), "Integer x = 5;");
    }

    #[test]
    fn test_query_annotation() {
        let text = "public void m() {} // ❌\nList<String> l = new List<String>(); // ✅";
        let markers = extract_markers(text, Some("//Method | //NewListInitExpression"));
        assert_eq!(
            markers.violation_markers[0].associated_node_type.as_deref(),
            Some("Method")
        );
        assert_eq!(
            markers.valid_markers[0].associated_node_type.as_deref(),
            Some("NewListInitExpression")
        );
    }
}
