//! Optional syntax-tree refinement
//!
//! When a parser is available, markers are associated with the query node
//! types that actually occur on their lines. Without one the harness keeps
//! the text-only association made during marker extraction.

use crate::engine::run_with_timeout;
use crate::markers::{marker_block, Marker};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Attribute holding a node's first source line
const LINE_ATTRIBUTE: &str = "BeginLine";

/// A syntax-tree node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AstNode {
    pub kind: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<AstNode>,
    /// Source line, when the parser reported one
    pub line: Option<usize>,
}

impl AstNode {
    pub fn new(kind: &str, line: Option<usize>) -> Self {
        Self {
            kind: kind.to_string(),
            line,
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: AstNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Every node in pre-order with its effective line
    ///
    /// Nodes without a line take the nearest ancestor's.
    pub fn lines(&self) -> Vec<(&AstNode, Option<usize>)> {
        let mut out = Vec::new();
        collect_lines(self, None, &mut out);
        out
    }
}

fn collect_lines<'a>(
    node: &'a AstNode,
    inherited: Option<usize>,
    out: &mut Vec<(&'a AstNode, Option<usize>)>,
) {
    let line = node.line.or(inherited);
    out.push((node, line));
    for child in &node.children {
        collect_lines(child, line, out);
    }
}

/// Short identifying detail of a node, dispatched on its kind
pub fn node_detail(node: &AstNode) -> Option<String> {
    let key = match node.kind.as_str() {
        "MethodCallExpression" => "FullMethodName",
        "Method" | "UserClass" | "UserInterface" | "UserEnum" | "UserTrigger" => "Image",
        "Field" | "VariableDeclaration" | "Parameter" | "Property" => "Name",
        "LiteralExpression" => "Image",
        "ReferenceExpression" | "VariableExpression" => "Image",
        "ModifierNode" => return modifier_detail(node),
        _ => return None,
    };
    node.get(key).map(String::from)
}

fn modifier_detail(node: &AstNode) -> Option<String> {
    let flags: Vec<&str> = ["Static", "Final", "Abstract", "Virtual", "Override", "Transient"]
        .iter()
        .copied()
        .filter(|flag| node.get(flag) == Some("true"))
        .collect();
    if flags.is_empty() {
        None
    } else {
        Some(flags.join(" ").to_lowercase())
    }
}

/// Marker-to-node association found in a syntax tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerAssociation {
    pub example_index: usize,
    pub marker_line: usize,
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Associate markers with the first query node type found on their block
///
/// `line_offset` converts example lines to tree lines.
pub fn associate(
    tree: &AstNode,
    content: &str,
    markers: &[Marker],
    node_types: &BTreeSet<String>,
    line_offset: usize,
    example_index: usize,
) -> Vec<MarkerAssociation> {
    let nodes = tree.lines();

    markers
        .iter()
        .filter_map(|marker| {
            let mut block: BTreeSet<usize> = marker_block(content, marker.line_number)
                .into_iter()
                .map(|l| l + line_offset)
                .collect();
            block.insert(marker.line_number + line_offset);

            nodes
                .iter()
                .find(|(node, line)| {
                    node_types.contains(&node.kind)
                        && line.map(|l| block.contains(&l)).unwrap_or(false)
                })
                .map(|(node, _)| MarkerAssociation {
                    example_index,
                    marker_line: marker.line_number,
                    node_type: node.kind.clone(),
                    detail: node_detail(node),
                })
        })
        .collect()
}

/// Source of syntax trees for fixture files
pub trait SyntaxProvider: Send + Sync {
    /// Tree for the file, or `None` when no parser is available
    fn parse(&self, file: &Path) -> Option<AstNode>;
}

/// Text-only mode
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSyntax;

impl SyntaxProvider for NoSyntax {
    fn parse(&self, _file: &Path) -> Option<AstNode> {
        None
    }
}

/// Trees from `pmd ast-dump --format xml`
#[derive(Debug, Clone)]
pub struct PmdAstDump {
    command: String,
    language: String,
    timeout: Duration,
}

impl PmdAstDump {
    pub fn new(command: &str, language: &str, timeout_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            language: language.to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

impl SyntaxProvider for PmdAstDump {
    fn parse(&self, file: &Path) -> Option<AstNode> {
        let args = vec![
            "ast-dump".to_string(),
            "--format".to_string(),
            "xml".to_string(),
            "--language".to_string(),
            self.language.clone(),
            "--file".to_string(),
            file.to_string_lossy().to_string(),
        ];

        match run_with_timeout(&self.command, &args, self.timeout) {
            Ok(output) if output.code == Some(0) => {
                let tree = parse_ast_xml(&output.stdout);
                if tree.is_none() {
                    log::warn!("Unreadable AST dump for {}", file.display());
                }
                tree
            }
            Ok(output) => {
                log::warn!(
                    "AST dump failed for {} (exit {:?}): {}",
                    file.display(),
                    output.code,
                    output.stderr.trim()
                );
                None
            }
            Err(e) => {
                log::warn!("AST dump unavailable: {}", e);
                None
            }
        }
    }
}

/// Parse an XML AST dump into a tree; `None` on malformed input
pub fn parse_ast_xml(xml: &str) -> Option<AstNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<AstNode> = Vec::new();
    let mut root: Option<AstNode> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(node_from(&e)),
            Ok(Event::Empty(e)) => {
                let node = node_from(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop()?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    root
}

fn node_from(e: &BytesStart) -> AstNode {
    let kind = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
    let attributes: BTreeMap<String, String> = e
        .attributes()
        .flatten()
        .map(|a| {
            (
                String::from_utf8_lossy(a.key.as_ref()).to_string(),
                String::from_utf8_lossy(&a.value).to_string(),
            )
        })
        .collect();
    let line = attributes.get(LINE_ATTRIBUTE).and_then(|v| v.parse().ok());

    AstNode {
        kind,
        attributes,
        children: Vec::new(),
        line,
    }
}
