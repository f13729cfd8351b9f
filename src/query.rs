//! Structural analysis of XPath rule queries
//!
//! The analyzer never evaluates a query. It only reads the query text and
//! summarizes what the query talks about: node types reached by path steps,
//! attributes, operators and the bracketed predicates that carry the rule's
//! decision logic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Apex node types known to PMD's XPath engine
pub const NODE_TYPES: &[&str] = &[
    "Annotation",
    "AnnotationParameter",
    "AnonymousClass",
    "ArrayLoadExpression",
    "ArrayStoreExpression",
    "AssignmentExpression",
    "BinaryExpression",
    "BindExpressions",
    "BlockStatement",
    "BooleanExpression",
    "BreakStatement",
    "CastExpression",
    "CatchBlockStatement",
    "ClassRefExpression",
    "ConstructorPreamble",
    "ConstructorPreambleStatement",
    "ContinueStatement",
    "DmlDeleteStatement",
    "DmlInsertStatement",
    "DmlMergeStatement",
    "DmlUndeleteStatement",
    "DmlUpdateStatement",
    "DmlUpsertStatement",
    "DoLoopStatement",
    "ElseWhenBlock",
    "EmptyReferenceExpression",
    "Expression",
    "ExpressionStatement",
    "Field",
    "FieldDeclaration",
    "FieldDeclarationStatements",
    "ForEachStatement",
    "ForLoopStatement",
    "FormalComment",
    "IdentifierCase",
    "IfBlockStatement",
    "IfElseBlockStatement",
    "IllegalStoreExpression",
    "InstanceOfExpression",
    "JavaMethodCallExpression",
    "JavaVariableExpression",
    "LiteralCase",
    "LiteralExpression",
    "MapEntryNode",
    "Method",
    "MethodBlockStatement",
    "MethodCallExpression",
    "ModifierNode",
    "ModifierOrAnnotation",
    "NestedExpression",
    "NewKeyValueObjectExpression",
    "NewListInitExpression",
    "NewListLiteralExpression",
    "NewMapInitExpression",
    "NewMapLiteralExpression",
    "NewObjectExpression",
    "NewSetInitExpression",
    "NewSetLiteralExpression",
    "PackageVersionExpression",
    "Parameter",
    "PostfixExpression",
    "PrefixExpression",
    "Property",
    "ReferenceExpression",
    "ReturnStatement",
    "RunAsBlockStatement",
    "SoqlExpression",
    "SoslExpression",
    "StandardCondition",
    "Statement",
    "SuperMethodCallExpression",
    "SuperVariableExpression",
    "SwitchStatement",
    "TernaryExpression",
    "ThisMethodCallExpression",
    "ThisVariableExpression",
    "ThrowStatement",
    "TriggerVariableExpression",
    "TryCatchFinallyBlockStatement",
    "TypeWhenBlock",
    "UserClass",
    "UserClassMethods",
    "UserEnum",
    "UserExceptionMethods",
    "UserInterface",
    "UserTrigger",
    "ValueWhenBlock",
    "VariableDeclaration",
    "VariableDeclarationStatements",
    "VariableExpression",
    "WhileLoopStatement",
];

static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static ATTRIBUTE_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@([A-Za-z_][A-Za-z0-9_]*)\s*!?=\s*(?:'([^']*)'|"([^"]*)")"#).unwrap()
});

static LET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\blet\s+\$[A-Za-z_][\w-]*\s*:=").unwrap());

static QUANTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(every|some)\s+\$").unwrap());

static FUNCTION_HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_:.-]*\s*\(").unwrap());

/// Classification of a predicate sub-expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalKind {
    And,
    Not,
    Or,
    If,
    Quantified,
    BooleanFunction,
}

impl fmt::Display for ConditionalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionalKind::And => write!(f, "and"),
            ConditionalKind::Not => write!(f, "not"),
            ConditionalKind::Or => write!(f, "or"),
            ConditionalKind::If => write!(f, "if"),
            ConditionalKind::Quantified => write!(f, "quantified"),
            ConditionalKind::BooleanFunction => write!(f, "boolean_function"),
        }
    }
}

/// A classified predicate found in the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditional {
    pub kind: ConditionalKind,
    /// Predicate body without the surrounding brackets
    pub expression: String,
    /// Byte offset of the body within the query
    pub position: usize,
}

impl Conditional {
    pub fn new(kind: ConditionalKind, expression: &str, position: usize) -> Self {
        Self {
            kind,
            expression: expression.to_string(),
            position,
        }
    }
}

/// Structural summary of a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub node_types: BTreeSet<String>,
    pub attributes: BTreeSet<String>,
    pub operators: BTreeSet<String>,
    pub conditionals: Vec<Conditional>,
    pub has_let_expressions: bool,
    pub has_unions: bool,
    /// Literal values compared against each attribute (`@Name = 'foo'`)
    pub attribute_values: BTreeMap<String, BTreeSet<String>>,
}

impl QueryAnalysis {
    /// True when nothing was extracted from the query
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty()
            && self.attributes.is_empty()
            && self.operators.is_empty()
            && self.conditionals.is_empty()
            && !self.has_let_expressions
            && !self.has_unions
    }
}

/// Analyze a query string
///
/// Absent or blank queries yield an empty analysis.
pub fn analyze(query: Option<&str>) -> QueryAnalysis {
    let query = match query {
        Some(q) if !q.trim().is_empty() => q,
        _ => return QueryAnalysis::default(),
    };
    let masked = mask_literals(query);

    let mut attribute_values: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for cap in ATTRIBUTE_VALUE_RE.captures_iter(query) {
        let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            attribute_values
                .entry(cap[1].to_string())
                .or_default()
                .insert(value.to_string());
        }
    }

    QueryAnalysis {
        node_types: extract_node_types(&masked),
        attributes: ATTRIBUTE_RE
            .captures_iter(&masked)
            .map(|c| c[1].to_string())
            .collect(),
        operators: extract_operators(&masked),
        conditionals: extract_conditionals(query, &masked),
        has_let_expressions: LET_RE.is_match(&masked),
        has_unions: masked.contains('|'),
        attribute_values,
    }
}

/// Longest vocabulary entry that prefixes `token`
pub fn match_node_type(token: &str) -> Option<&'static str> {
    NODE_TYPES
        .iter()
        .filter(|name| token.starts_with(**name))
        .max_by_key(|name| name.len())
        .copied()
}

fn extract_node_types(masked: &str) -> BTreeSet<String> {
    let bytes = masked.as_bytes();
    let mut found = BTreeSet::new();
    let mut i = 0;

    while i < bytes.len() {
        let step_end = if bytes[i] == b'/' {
            Some(i + 1)
        } else if bytes[i] == b':' && bytes.get(i + 1) == Some(&b':') {
            Some(i + 2)
        } else {
            None
        };

        if let Some(mut start) = step_end {
            while start < bytes.len() && bytes[start] == b'/' {
                start += 1;
            }
            let end = start
                + bytes[start..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
            if end > start {
                if let Some(name) = match_node_type(&masked[start..end]) {
                    found.insert(name.to_string());
                }
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }

    found
}

fn extract_operators(masked: &str) -> BTreeSet<String> {
    let bytes = masked.as_bytes();
    let mut ops = BTreeSet::new();
    let mut i = 0;

    while i < bytes.len() {
        let two = bytes.get(i..i + 2);
        match two {
            Some(b"!=") | Some(b"<=") | Some(b">=") => {
                ops.insert(masked[i..i + 2].to_string());
                i += 2;
                continue;
            }
            Some(b":=") => {
                i += 2;
                continue;
            }
            _ => {}
        }
        match bytes[i] {
            b'=' | b'<' | b'>' => {
                ops.insert((bytes[i] as char).to_string());
            }
            _ => {}
        }
        i += 1;
    }

    for keyword in ["and", "or", "not"] {
        if find_keyword(masked, keyword, false).is_some() {
            ops.insert(keyword.to_string());
        }
    }

    ops
}

fn extract_conditionals(query: &str, masked: &str) -> Vec<Conditional> {
    let mut pairs = Vec::new();
    let mut stack = Vec::new();

    for (i, b) in masked.bytes().enumerate() {
        match b {
            b'[' => stack.push(i),
            b']' => {
                if let Some(open) = stack.pop() {
                    pairs.push((open, i));
                }
            }
            _ => {}
        }
    }
    pairs.sort();

    pairs
        .into_iter()
        .filter_map(|(open, close)| {
            let body = &query[open + 1..close];
            let masked_body = &masked[open + 1..close];
            classify(body, masked_body).map(|kind| Conditional::new(kind, body.trim(), open + 1))
        })
        .collect()
}

/// Classify a predicate body; `None` when no conditional marker applies
pub fn classify(body: &str, masked_body: &str) -> Option<ConditionalKind> {
    let trimmed = masked_body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if starts_with_call(trimmed, "not") {
        return Some(ConditionalKind::Not);
    }
    if find_keyword(masked_body, "and", true).is_some() {
        return Some(ConditionalKind::And);
    }
    if find_keyword(masked_body, "or", true).is_some() {
        return Some(ConditionalKind::Or);
    }
    if starts_with_word(trimmed, "if") {
        return Some(ConditionalKind::If);
    }
    if QUANTIFIER_RE.is_match(trimmed) {
        return Some(ConditionalKind::Quantified);
    }
    if is_single_call(body.trim(), trimmed) {
        return Some(ConditionalKind::BooleanFunction);
    }
    None
}

fn starts_with_call(s: &str, name: &str) -> bool {
    s.strip_prefix(name)
        .map(|rest| rest.trim_start().starts_with('('))
        .unwrap_or(false)
}

fn starts_with_word(s: &str, word: &str) -> bool {
    s.strip_prefix(word)
        .and_then(|rest| rest.chars().next())
        .map(|c| c.is_whitespace() || c == '(')
        .unwrap_or(false)
}

fn is_single_call(body: &str, masked: &str) -> bool {
    let Some(head) = FUNCTION_HEAD_RE.find(body) else {
        return false;
    };
    let open = head.end() - 1;
    matching_paren(masked, open) == Some(masked.len() - 1)
}

fn matching_paren(masked: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in masked.bytes().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Replace the contents of quoted literals with spaces, keeping byte offsets
pub fn mask_literals(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.extend(std::iter::repeat(' ').take(c.len_utf8())),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }

    out
}

/// Find a keyword standing as a word outside literals
///
/// With `top_level`, occurrences nested inside `(` or `[` are skipped.
pub fn find_keyword(masked: &str, keyword: &str, top_level: bool) -> Option<usize> {
    keyword_positions(masked, keyword, top_level).into_iter().next()
}

fn keyword_positions(masked: &str, keyword: &str, top_level: bool) -> Vec<usize> {
    let bytes = masked.as_bytes();
    let kw = keyword.as_bytes();
    let mut depth = 0i32;
    let mut found = Vec::new();

    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            _ => {}
        }
        if top_level && depth > 0 {
            continue;
        }
        if !bytes[i..].starts_with(kw) {
            continue;
        }
        let before_ok = i == 0 || is_word_break(bytes[i - 1]) || matches!(bytes[i - 1], b'(' | b'[');
        let after_ok = bytes
            .get(i + kw.len())
            .map(|b| is_word_break(*b) || *b == b'(')
            .unwrap_or(false);
        if before_ok && after_ok {
            found.push(i);
        }
    }

    found
}

fn is_word_break(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b')' || b == b']'
}

/// Split an expression at every top-level occurrence of `keyword`
pub fn split_top_level<'a>(expression: &'a str, keyword: &str) -> Vec<&'a str> {
    let masked = mask_literals(expression);
    let mut parts = Vec::new();
    let mut start = 0;

    for pos in keyword_positions(&masked, keyword, true) {
        parts.push(expression[start..pos].trim());
        start = pos + keyword.len();
    }
    parts.push(expression[start..].trim());

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_none_is_empty() {
        let analysis = analyze(None);
        assert!(analysis.is_empty());
        assert!(!analysis.has_let_expressions);
        assert!(!analysis.has_unions);
        assert_eq!(analyze(Some("   ")), QueryAnalysis::default());
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let query = "//Method[@Visibility='public' and not(@Name = 'foo')]//MethodCallExpression";
        assert_eq!(analyze(Some(query)), analyze(Some(query)));
    }

    #[test]
    fn test_node_types_longest_match() {
        let analysis = analyze(Some("//Method//MethodCallExpression | //UnknownThing"));
        let types: Vec<&str> = analysis.node_types.iter().map(|s| s.as_str()).collect();
        assert_eq!(types, vec!["Method", "MethodCallExpression"]);
        assert!(analysis.has_unions);
    }

    #[test]
    fn test_node_types_after_axis() {
        let analysis = analyze(Some(
            "//VariableExpression[not(ancestor::FieldDeclarationStatements)]",
        ));
        assert!(analysis.node_types.contains("VariableExpression"));
        assert!(analysis.node_types.contains("FieldDeclarationStatements"));
    }

    #[test]
    fn test_node_types_ignore_literals() {
        let analysis = analyze(Some("//Method[@Name = '/Field']"));
        assert!(!analysis.node_types.contains("Field"));
    }

    #[test]
    fn test_attributes_and_values() {
        let analysis = analyze(Some(
            "//MethodCallExpression[@FullMethodName = 'System.debug' or @FullMethodName=\"Database.query\"]",
        ));
        assert!(analysis.attributes.contains("FullMethodName"));
        let values = &analysis.attribute_values["FullMethodName"];
        assert!(values.contains("System.debug"));
        assert!(values.contains("Database.query"));
    }

    #[test]
    fn test_operators() {
        let analysis = analyze(Some("//Method[@Arity >= 2 and @Name != 'x' and not(@Static = true())]"));
        for op in [">=", "!=", "=", "and", "not"] {
            assert!(analysis.operators.contains(op), "missing {}", op);
        }
        assert!(!analysis.operators.contains("or"));
    }

    #[test]
    fn test_classification() {
        let analysis = analyze(Some(
            "//Field[@Final = true() and @Static = true()][not(@Name = 'x')][@A = 1 or @B = 2][starts-with(@Name, 'get')]",
        ));
        let kinds: Vec<ConditionalKind> = analysis.conditionals.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ConditionalKind::And,
                ConditionalKind::Not,
                ConditionalKind::Or,
                ConditionalKind::BooleanFunction
            ]
        );
        assert_eq!(analysis.conditionals[0].expression, "@Final = true() and @Static = true()");
    }

    #[test]
    fn test_and_inside_parens_is_not_top_level() {
        let analysis = analyze(Some("//Method[count(x[@a and @b]) > 1]"));
        // outer predicate has no top-level and; the nested one does
        assert_eq!(analysis.conditionals.len(), 1);
        assert_eq!(analysis.conditionals[0].expression, "@a and @b");
    }

    #[test]
    fn test_quantified_and_if() {
        let analysis = analyze(Some(
            "//Method[every $p in Parameter satisfies $p/@Name][if (@Static) then true() else false()]",
        ));
        let kinds: Vec<ConditionalKind> = analysis.conditionals.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ConditionalKind::Quantified, ConditionalKind::If]);
    }

    #[test]
    fn test_numeric_predicate_not_classified() {
        let analysis = analyze(Some("//Method[1]"));
        assert!(analysis.conditionals.is_empty());
    }

    #[test]
    fn test_let_detection() {
        let analysis = analyze(Some("let $m := //Method return $m[@Static = true()]"));
        assert!(analysis.has_let_expressions);
    }

    #[test]
    fn test_and_keyword_in_literal_ignored() {
        let analysis = analyze(Some("//Method[@Name = 'this and that']"));
        assert!(analysis.conditionals.is_empty());
        assert!(!analysis.operators.contains("and"));
    }

    #[test]
    fn test_split_top_level() {
        let parts = split_top_level("@A = 'x and y' and (b and c) and d", "and");
        assert_eq!(parts, vec!["@A = 'x and y'", "(b and c)", "d"]);
    }

    #[test]
    fn test_mask_literals_keeps_length() {
        let s = "@Name = 'héllo'";
        assert_eq!(mask_literals(s).len(), s.len());
    }
}
