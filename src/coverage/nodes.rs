//! Node-type and attribute coverage heuristics
//!
//! Each query node type maps to a text heuristic that recognizes the Apex
//! construct producing that node. Types without a dedicated heuristic fall
//! back to a case-insensitive search for the type's own name.

use super::{CoverageEvidence, CoverageResult};
use crate::query::{QueryAnalysis, NODE_TYPES};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Node type that always exists because fixtures wrap snippets in a class
pub const BOILERPLATE_NODE_TYPE: &str = "UserClass";

/// Attribute holding the fully-qualified name of a method call
pub const FULL_METHOD_NAME: &str = "FullMethodName";

/// Words that look like calls or declarations but are control flow
const NON_CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "catch", "switch", "return", "new", "else", "throw", "do", "when",
    "insert", "update", "delete", "upsert", "merge", "undelete", "instanceof", "on",
];

static METHOD_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z_][\w<>,.\[\]]*\s+([A-Za-z_]\w*)\s*\([^)]*\)\s*\{").unwrap()
});

static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)\s*\(").unwrap());

static DOTTED_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+)\s*\(").unwrap());

static VARIABLE_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][\w.]*)(?:<[^;=]*>)?(?:\[\])?\s+[A-Za-z_]\w*\s*(?:=|;)").unwrap()
});

static FIELD_MODIFIERS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:public|private|protected|global|static|final|transient)\s+)+").unwrap()
});

/// How a node type is recognized in example text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heuristic {
    Boilerplate,
    Pattern(&'static str, &'static str),
    MethodDeclaration,
    MethodCall,
    FieldDeclaration,
    VariableDeclaration,
    NameSearch,
}

fn heuristic_for(node_type: &str) -> Heuristic {
    use Heuristic::*;

    match node_type {
        BOILERPLATE_NODE_TYPE => Boilerplate,
        "Method" | "MethodBlockStatement" => MethodDeclaration,
        "MethodCallExpression" => MethodCall,
        "Field" | "FieldDeclaration" | "FieldDeclarationStatements" => FieldDeclaration,
        "VariableDeclaration" | "VariableDeclarationStatements" => VariableDeclaration,
        "NewListInitExpression" | "NewListLiteralExpression" => Pattern(
            r"(?i)\bnew\s+List\s*<[^>]*>\s*[({]|\bnew\s+\w+\s*\[\s*\]",
            "list construction",
        ),
        "NewMapInitExpression" | "NewMapLiteralExpression" => {
            Pattern(r"(?i)\bnew\s+Map\s*<[^>]*>\s*[({]", "map construction")
        }
        "NewSetInitExpression" | "NewSetLiteralExpression" => {
            Pattern(r"(?i)\bnew\s+Set\s*<[^>]*>\s*[({]", "set construction")
        }
        "NewObjectExpression" => Pattern(r"(?i)\bnew\s+[A-Za-z_][\w.]*\s*\(", "object construction"),
        "NewKeyValueObjectExpression" => Pattern(
            r"(?i)\bnew\s+[A-Za-z_][\w.]*\s*\(\s*\w+\s*=",
            "key-value object construction",
        ),
        "IfBlockStatement" => Pattern(r"(?i)\bif\s*\(", "if statement"),
        "IfElseBlockStatement" => Pattern(r"(?i)\belse\b", "if-else statement"),
        "StandardCondition" => Pattern(r"(?i)\b(?:if|while)\s*\(", "condition"),
        "ForEachStatement" => Pattern(
            r"(?i)\bfor\s*\(\s*[\w<>,.\[\] ]+\s+\w+\s*:",
            "for-each loop",
        ),
        "ForLoopStatement" => Pattern(r"(?i)\bfor\s*\([^;)]*;", "for loop"),
        "WhileLoopStatement" => Pattern(r"(?i)\bwhile\s*\(", "while loop"),
        "DoLoopStatement" => Pattern(r"(?i)\bdo\s*\{", "do-while loop"),
        "TryCatchFinallyBlockStatement" => Pattern(r"(?i)\btry\s*\{", "try block"),
        "CatchBlockStatement" => Pattern(r"(?i)\bcatch\s*\(", "catch block"),
        "ThrowStatement" => Pattern(r"(?i)\bthrow\b", "throw statement"),
        "ReturnStatement" => Pattern(r"(?i)\breturn\b", "return statement"),
        "BreakStatement" => Pattern(r"(?i)\bbreak\s*;", "break statement"),
        "ContinueStatement" => Pattern(r"(?i)\bcontinue\s*;", "continue statement"),
        "SwitchStatement" => Pattern(r"(?i)\bswitch\s+on\b", "switch statement"),
        "ValueWhenBlock" | "TypeWhenBlock" | "ElseWhenBlock" => {
            Pattern(r"(?i)\bwhen\b", "when block")
        }
        "SoqlExpression" => Pattern(r"(?i)\[\s*select\b", "SOQL query"),
        "SoslExpression" => Pattern(r"(?i)\[\s*find\b", "SOSL query"),
        "DmlInsertStatement" => Pattern(r"(?i)\binsert\s+[\w(]", "insert statement"),
        "DmlUpdateStatement" => Pattern(r"(?i)\bupdate\s+[\w(]", "update statement"),
        "DmlDeleteStatement" => Pattern(r"(?i)\bdelete\s+[\w(]", "delete statement"),
        "DmlUpsertStatement" => Pattern(r"(?i)\bupsert\s+[\w(]", "upsert statement"),
        "DmlUndeleteStatement" => Pattern(r"(?i)\bundelete\s+[\w(]", "undelete statement"),
        "DmlMergeStatement" => Pattern(r"(?i)\bmerge\s+\w", "merge statement"),
        "LiteralExpression" => Pattern(
            r"(?i)'[^']*'|\b\d+(?:\.\d+)?\b|\b(?:true|false|null)\b",
            "literal",
        ),
        "BooleanExpression" => Pattern(r"==|!=|&&|\|\||<=|>=", "boolean expression"),
        "BinaryExpression" => Pattern(r"\w\s*[+\-*/]\s*\w", "binary expression"),
        "AssignmentExpression" => Pattern(r"\w\s*[+\-*/]?=\s*[^=]", "assignment"),
        "TernaryExpression" => Pattern(r"\?[^:;]+:", "ternary expression"),
        "CastExpression" => Pattern(r"\(\s*[A-Z]\w*(?:<[^>]*>)?\s*\)\s*[\w(]", "cast"),
        "InstanceOfExpression" => Pattern(r"(?i)\binstanceof\b", "instanceof"),
        "PrefixExpression" => Pattern(r"(?:\+\+|--)\s*\w", "prefix operator"),
        "PostfixExpression" => Pattern(r"\w\s*(?:\+\+|--)", "postfix operator"),
        "Annotation" => Pattern(r"@[A-Za-z_]\w*", "annotation"),
        "AnnotationParameter" => Pattern(r"@\w+\s*\(\s*\w+\s*=", "annotation parameter"),
        "ModifierNode" | "ModifierOrAnnotation" => Pattern(
            r"(?i)\b(?:public|private|protected|global|static|final|abstract|virtual|override|transient|webservice|testmethod)\b",
            "modifier",
        ),
        "Parameter" => Pattern(r"\(\s*[\w<>,.\[\]]+\s+\w+\s*[,)]", "parameter"),
        "Property" => Pattern(
            r"(?i)\{\s*(?:(?:public|private|protected)\s+)?get\s*[;{]",
            "property accessor",
        ),
        "UserInterface" => Pattern(r"(?i)\binterface\s+\w", "interface"),
        "UserEnum" => Pattern(r"(?i)\benum\s+\w", "enum"),
        "UserTrigger" => Pattern(r"(?i)\btrigger\s+\w+\s+on\b", "trigger"),
        "ThisVariableExpression" => Pattern(r"(?i)\bthis\.\w", "this reference"),
        "ThisMethodCallExpression" => Pattern(r"(?i)\bthis\s*\(", "this() call"),
        "SuperMethodCallExpression" => Pattern(r"(?i)\bsuper\s*[.(]", "super call"),
        "SuperVariableExpression" => Pattern(r"(?i)\bsuper\.\w", "super reference"),
        "ArrayLoadExpression" => Pattern(r"\w\s*\[\s*[\w.]+\s*\]", "array load"),
        "ArrayStoreExpression" => Pattern(r"\w\s*\[[^\]]+\]\s*=[^=]", "array store"),
        "ClassRefExpression" => Pattern(r"(?i)\.class\b", "class reference"),
        "VariableExpression" | "ReferenceExpression" => {
            Pattern(r"\b[A-Za-z_]\w*\b", "identifier")
        }
        "BlockStatement" => Pattern(r"\{", "block"),
        "ExpressionStatement" => Pattern(r";", "statement"),
        _ => NameSearch,
    }
}

static COMPILED: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    NODE_TYPES
        .iter()
        .filter_map(|t| match heuristic_for(t) {
            Heuristic::Pattern(pattern, _) => Some((*t, Regex::new(pattern).unwrap())),
            _ => None,
        })
        .collect()
});

/// Whether the text plausibly produces a node of the given type
pub fn node_type_covered(node_type: &str, text: &str) -> bool {
    match_node_type(node_type, text).0
}

fn match_node_type(node_type: &str, text: &str) -> (bool, String) {
    match heuristic_for(node_type) {
        Heuristic::Boilerplate => (true, "class scaffolding is always present".to_string()),
        Heuristic::Pattern(_, what) => {
            let found = COMPILED
                .get(node_type)
                .map(|re| re.is_match(text))
                .unwrap_or(false);
            (found, what.to_string())
        }
        Heuristic::MethodDeclaration => (
            METHOD_DECL_RE
                .captures_iter(text)
                .any(|c| !is_non_call_keyword(&c[1])),
            "method declaration".to_string(),
        ),
        Heuristic::MethodCall => (!call_names(text).is_empty(), "method call".to_string()),
        Heuristic::FieldDeclaration => (
            text.lines().any(looks_like_field_declaration),
            "field declaration".to_string(),
        ),
        Heuristic::VariableDeclaration => (
            VARIABLE_DECL_RE
                .captures_iter(text)
                .any(|c| !is_non_call_keyword(&c[1])),
            "variable declaration".to_string(),
        ),
        Heuristic::NameSearch => (
            text.to_lowercase().contains(&node_type.to_lowercase()),
            format!("mention of '{}'", node_type),
        ),
    }
}

fn is_non_call_keyword(word: &str) -> bool {
    NON_CALL_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}

/// Names of all calls in the text, lowercased, in order of appearance
pub fn call_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in CALL_RE.captures_iter(text) {
        let name = &cap[1];
        if is_non_call_keyword(name) || is_declaration_at(text, cap.get(1).map(|m| m.start())) {
            continue;
        }
        let lowered = name.to_lowercase();
        if !names.contains(&lowered) {
            names.push(lowered);
        }
    }
    names
}

/// A name preceded by `new` or by a type (`void m(`) is not a call
fn is_declaration_at(text: &str, start: Option<usize>) -> bool {
    let Some(start) = start else {
        return false;
    };
    let previous = text[..start]
        .trim_end()
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_' || c == '>' || c == '<'))
        .next()
        .unwrap_or("");
    if previous.eq_ignore_ascii_case("new") {
        return true;
    }
    !previous.is_empty() && !is_non_call_keyword(previous)
}

/// Dotted call names (`System.debug`) as written
pub fn dotted_calls(text: &str) -> Vec<String> {
    DOTTED_CALL_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Field-declaration-shaped line: modifiers, a type, a name, optional initializer
pub fn looks_like_field_declaration(line: &str) -> bool {
    let code = match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    };
    let code = code.trim();
    let Some(stripped) = code.strip_suffix(';') else {
        return false;
    };
    let Some(modifiers) = FIELD_MODIFIERS_RE.find(stripped) else {
        return false;
    };
    let declaration = stripped[modifiers.end()..]
        .split('=')
        .next()
        .unwrap_or("")
        .trim();
    if declaration.contains('(') {
        return false;
    }
    declaration.split_whitespace().count() >= 2
}

/// Keyword spelled by a boolean modifier attribute (`@Static` -> `static`)
pub fn modifier_keyword(attribute: &str) -> Option<&'static str> {
    match attribute {
        "Final" => Some("final"),
        "Static" => Some("static"),
        "Abstract" => Some("abstract"),
        "Virtual" => Some("virtual"),
        "Override" => Some("override"),
        "Transient" => Some("transient"),
        "Public" => Some("public"),
        "Private" => Some("private"),
        "Protected" => Some("protected"),
        "Global" => Some("global"),
        "WebService" => Some("webservice"),
        "Test" => Some("testmethod"),
        "WithSharing" => Some("with sharing"),
        "WithoutSharing" => Some("without sharing"),
        "InheritedSharing" => Some("inherited sharing"),
        _ => None,
    }
}

/// Case-insensitive whole-word search
pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    let haystack = text.to_lowercase();
    let needle = keyword.to_lowercase();
    if needle.is_empty() {
        return false;
    }

    let is_word = |c: Option<char>| c.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false);
    haystack.match_indices(&needle).any(|(pos, _)| {
        let before = haystack[..pos].chars().next_back();
        let after = haystack[pos + needle.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

/// Coverage of every node type referenced by the query
///
/// Returns `None` when the query references no node types.
pub fn check_node_types(analysis: &QueryAnalysis, content: &str) -> Option<CoverageResult> {
    if analysis.node_types.is_empty() {
        return None;
    }

    let total = analysis.node_types.len();
    let mut evidence = Vec::with_capacity(total + 1);
    let mut uncovered = Vec::new();

    for node_type in &analysis.node_types {
        let (found, what) = match_node_type(node_type, content);
        let description = if found {
            format!("{}: found {}", node_type, what)
        } else {
            format!("{}: no {} found", node_type, what)
        };
        evidence.push(CoverageEvidence::new(
            "node_type",
            &description,
            usize::from(found),
            1,
        ));
        if !found {
            uncovered.push(node_type.clone());
        }
    }

    let covered = total - uncovered.len();
    let message = format!("{}/{} node types covered", covered, total);
    let mut result = if uncovered.is_empty() {
        CoverageResult::covered("node type", "node types", &message)
    } else {
        CoverageResult::uncovered("node type", "node types", &message)
    };
    evidence.push(CoverageEvidence::new("node_types", &message, covered, total));
    result.evidence = evidence;
    Some(result.with_unsatisfied(uncovered))
}

/// Coverage of every attribute referenced by the query
///
/// Attributes with nothing to look for are listed as unchecked and do not
/// count against the fraction; when no attribute can be checked at all the
/// result is inconclusive.
pub fn check_attributes(analysis: &QueryAnalysis, content: &str) -> Option<CoverageResult> {
    if analysis.attributes.is_empty() {
        return None;
    }

    let mut evidence = Vec::new();
    let mut uncovered = Vec::new();
    let mut unchecked = Vec::new();
    let mut checked = 0;

    for attribute in &analysis.attributes {
        let verdict = if attribute == FULL_METHOD_NAME {
            let calls = dotted_calls(content);
            Some((!calls.is_empty(), "dotted method call".to_string()))
        } else if let Some(keyword) = modifier_keyword(attribute) {
            Some((
                contains_keyword(content, keyword),
                format!("'{}' keyword", keyword),
            ))
        } else if let Some(values) = analysis.attribute_values.get(attribute) {
            let lowered = content.to_lowercase();
            let hit = values.iter().find(|v| lowered.contains(&v.to_lowercase()));
            Some((
                hit.is_some(),
                match hit {
                    Some(v) => format!("literal '{}'", v),
                    None => format!(
                        "any of {}",
                        values.iter().cloned().collect::<Vec<_>>().join(", ")
                    ),
                },
            ))
        } else {
            None
        };

        match verdict {
            Some((found, what)) => {
                checked += 1;
                let description = if found {
                    format!("@{}: found {}", attribute, what)
                } else {
                    format!("@{}: no {}", attribute, what)
                };
                evidence.push(CoverageEvidence::new(
                    "attribute",
                    &description,
                    usize::from(found),
                    1,
                ));
                if !found {
                    uncovered.push(format!("@{}", attribute));
                }
            }
            None => unchecked.push(format!("@{}", attribute)),
        }
    }

    if checked == 0 {
        let message = format!(
            "No literal values to check for {}; no evidence",
            unchecked.join(", ")
        );
        return Some(CoverageResult::inconclusive("attribute", "attributes", &message));
    }

    let covered = checked - uncovered.len();
    let mut message = format!("{}/{} attributes covered", covered, checked);
    if !unchecked.is_empty() {
        message.push_str(&format!(" ({} unchecked: {})", unchecked.len(), unchecked.join(", ")));
    }

    let mut result = if uncovered.is_empty() {
        CoverageResult::covered("attribute", "attributes", &message)
    } else {
        CoverageResult::uncovered("attribute", "attributes", &message)
    };
    evidence.push(CoverageEvidence::new("attributes", &message, covered, checked));
    result.evidence = evidence;
    Some(result.with_unsatisfied(uncovered))
}
