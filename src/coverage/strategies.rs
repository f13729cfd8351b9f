//! Coverage strategies, one per conditional kind
//!
//! Every strategy is a pure function over the example text. Kinds without a
//! real heuristic report an inconclusive result instead of a failure.

use super::nodes::{contains_keyword, looks_like_field_declaration, modifier_keyword, node_type_covered};
use super::{CoverageEvidence, CoverageResult};
use crate::markers::{classify_line, LineKind};
use crate::query::{self, Conditional, ConditionalKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// Words that never count as evidence on their own
const STOP_WORDS: &[&str] = &[
    "true", "false", "and", "or", "not", "if", "then", "else", "every", "some", "satisfies",
    "in", "return", "let", "for", "div", "mod", "eq", "ne", "lt", "le", "gt", "ge", "is",
    "ancestor", "ancestor-or-self", "descendant", "descendant-or-self", "parent", "child",
    "self", "following", "following-sibling", "preceding", "preceding-sibling", "attribute",
    "node", "count", "exists", "empty", "contains", "starts-with", "ends-with", "matches",
    "string-length", "lower-case", "upper-case", "string", "number", "boolean", "position",
    "last", "name", "local-name", "concat", "substring", "normalize-space", "replace",
    "tokenize", "sum", "min", "max", "distinct-values", "text",
];

static MODIFIER_PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(?\s*@([A-Za-z_]\w*)\s*(?:=\s*(true|false)\s*\(\s*\))?\s*\)?$").unwrap()
});

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).unwrap());

static FIELD_NODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ancestor::(?:FieldDeclarationStatements|FieldDeclaration|Field)\b").unwrap());

/// Check one conditional against one example's text
pub fn check_conditional(conditional: &Conditional, content: &str) -> CoverageResult {
    match conditional.kind {
        ConditionalKind::And => and_operator(conditional, content),
        ConditionalKind::Not => not_condition(conditional, content),
        ConditionalKind::Or
        | ConditionalKind::If
        | ConditionalKind::Quantified
        | ConditionalKind::BooleanFunction => not_implemented(conditional),
    }
}

fn subject(conditional: &Conditional) -> String {
    format!("{}: {}", conditional.kind, conditional.expression)
}

fn and_operator(conditional: &Conditional, content: &str) -> CoverageResult {
    let category = conditional.kind.to_string();
    let subject = subject(conditional);
    let expression = conditional.expression.trim();

    if expression.is_empty() {
        return CoverageResult::uncovered(&category, &subject, "Empty AND expression, nothing to check");
    }

    let parts = query::split_top_level(expression, "and");

    if let Some(keywords) = modifier_keywords(&parts) {
        let missing: Vec<&str> = keywords
            .iter()
            .copied()
            .filter(|kw| !contains_keyword(content, kw))
            .collect();
        let all_present = missing.is_empty();
        let description = format!("modifier keywords: {}", keywords.join(", "));
        let evidence =
            CoverageEvidence::new("modifier_keywords", &description, usize::from(all_present), 1);

        return if all_present {
            let message = format!(
                "{}/{} AND parts covered (modifiers: {})",
                parts.len(),
                parts.len(),
                keywords.join(", ")
            );
            CoverageResult::covered(&category, &subject, &message).with_evidence(evidence)
        } else {
            let message = format!("Missing modifier keyword(s): {}", missing.join(", "));
            CoverageResult::uncovered(&category, &subject, &message)
                .with_evidence(evidence)
                .with_unsatisfied(missing.iter().map(|kw| kw.to_string()).collect())
        };
    }

    if parts.len() < 2 {
        return keyword_result(&category, &subject, expression, content);
    }

    let mut result_evidence = Vec::with_capacity(parts.len() + 1);
    let mut unsatisfied = Vec::new();
    for part in &parts {
        let covered = part_covered(part, content);
        result_evidence.push(CoverageEvidence::new(
            "and_part",
            part,
            usize::from(covered),
            1,
        ));
        if !covered {
            unsatisfied.push(part.to_string());
        }
    }

    let satisfied = parts.len() - unsatisfied.len();
    let summary = format!("{}/{} AND parts covered", satisfied, parts.len());
    result_evidence.push(CoverageEvidence::new("and_parts", &summary, satisfied, parts.len()));

    let mut result = if unsatisfied.is_empty() {
        CoverageResult::covered(&category, &subject, &summary)
    } else {
        let message = format!("{}; missing: {}", summary, unsatisfied.join(", "));
        CoverageResult::uncovered(&category, &subject, &message)
    };
    result.evidence = result_evidence;
    result.with_unsatisfied(unsatisfied)
}

/// Keywords of an AND made only of `@Modifier = true()` parts
fn modifier_keywords(parts: &[&str]) -> Option<Vec<&'static str>> {
    if parts.is_empty() {
        return None;
    }
    parts
        .iter()
        .map(|part| match modifier_comparison(part) {
            Some((keyword, true)) => Some(keyword),
            _ => None,
        })
        .collect()
}

/// `@Static = true()` -> ("static", true); bare `@Static` counts as true
fn modifier_comparison(part: &str) -> Option<(&'static str, bool)> {
    let caps = MODIFIER_PART_RE.captures(part.trim())?;
    let keyword = modifier_keyword(&caps[1])?;
    let expected = caps.get(2).map(|m| m.as_str() == "true").unwrap_or(true);
    Some((keyword, expected))
}

/// Whether one AND part is plausibly exercised by the text
fn part_covered(part: &str, content: &str) -> bool {
    if let Some((keyword, expected)) = modifier_comparison(part) {
        return if expected {
            contains_keyword(content, keyword)
        } else {
            code_lines(content).any(|line| !contains_keyword(line, keyword))
        };
    }

    let analysis = query::analyze(Some(part));
    if !analysis.attribute_values.is_empty() {
        let lowered = content.to_lowercase();
        return analysis
            .attribute_values
            .values()
            .all(|values| values.iter().any(|v| lowered.contains(&v.to_lowercase())));
    }
    if !analysis.node_types.is_empty() {
        return analysis
            .node_types
            .iter()
            .all(|node_type| node_type_covered(node_type, content));
    }

    let literals = quoted_literals(part);
    if !literals.is_empty() {
        let lowered = content.to_lowercase();
        return literals.iter().any(|l| lowered.contains(&l.to_lowercase()));
    }

    keywords_present(part, content).0
}

fn code_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter_map(|line| match classify_line(line) {
        LineKind::Code => Some(line),
        LineKind::Inline { code: Some(code), .. } => Some(code),
        _ => None,
    })
}

fn quoted_literals(text: &str) -> Vec<String> {
    QUOTED_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn not_condition(conditional: &Conditional, content: &str) -> CoverageResult {
    let category = conditional.kind.to_string();
    let subject = subject(conditional);
    let expression = conditional.expression.trim();

    if is_static_final_field_pattern(expression) {
        let matching = content
            .lines()
            .filter(|line| {
                looks_like_field_declaration(line)
                    && contains_keyword(line, "static")
                    && contains_keyword(line, "final")
            })
            .count();
        let evidence = CoverageEvidence::new(
            "static_final_field",
            &format!("{} static final field declaration(s)", matching),
            matching,
            1,
        );
        return if matching > 0 {
            CoverageResult::covered(
                &category,
                &subject,
                "Excluded static final field declaration is present",
            )
            .with_evidence(evidence)
        } else {
            CoverageResult::uncovered(
                &category,
                &subject,
                "No static final field declaration exercises the exclusion",
            )
            .with_evidence(evidence)
        };
    }

    keyword_result(&category, &subject, negated_pattern(expression), content)
}

fn is_static_final_field_pattern(expression: &str) -> bool {
    FIELD_NODE_RE.is_match(expression)
        && expression.contains("@Static")
        && expression.contains("@Final")
}

/// Body of `not(...)`, or the expression itself
fn negated_pattern(expression: &str) -> &str {
    expression
        .strip_prefix("not")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(expression)
}

fn keyword_result(category: &str, subject: &str, expression: &str, content: &str) -> CoverageResult {
    let (found, keywords) = keywords_present(expression, content);
    if keywords.is_empty() {
        return CoverageResult::inconclusive(category, subject, "No keywords to check; no evidence");
    }

    let hits: Vec<&String> = keywords
        .iter()
        .filter(|kw| keyword_in(kw, content))
        .collect();
    let evidence = CoverageEvidence::new(
        "keywords",
        &format!("keywords: {}", keywords.join(", ")),
        hits.len(),
        1,
    );
    if found {
        let message = format!(
            "Found keyword(s): {}",
            hits.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
        CoverageResult::covered(category, subject, &message).with_evidence(evidence)
    } else {
        let message = format!("None of the keywords found: {}", keywords.join(", "));
        CoverageResult::uncovered(category, subject, &message).with_evidence(evidence)
    }
}

/// Whether any extracted keyword occurs, plus the keywords themselves
fn keywords_present(expression: &str, content: &str) -> (bool, Vec<String>) {
    let keywords = extract_keywords(expression);
    let found = keywords.iter().any(|kw| keyword_in(kw, content));
    (found, keywords)
}

fn keyword_in(keyword: &str, content: &str) -> bool {
    if query::match_node_type(keyword) == Some(keyword) {
        return node_type_covered(keyword, content);
    }
    content.to_lowercase().contains(&keyword.to_lowercase())
}

/// Plain words of an expression, without attributes, variables and XPath vocabulary
pub fn extract_keywords(expression: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let separators = |c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '=' | '!' | '<' | '>' | '(' | ')' | '[' | ']' | ',' | '/' | '|' | ':' | '{' | '}' | '+'
            )
    };

    for token in expression.split(separators) {
        let token = token.trim_matches(|c| c == '\'' || c == '"' || c == '.');
        if token.is_empty()
            || token.starts_with('@')
            || token.starts_with('$')
            || token.parse::<f64>().is_ok()
            || STOP_WORDS.iter().any(|w| w.eq_ignore_ascii_case(token))
        {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

fn not_implemented(conditional: &Conditional) -> CoverageResult {
    let message = format!(
        "Coverage check not implemented for {} conditionals",
        conditional.kind
    );
    CoverageResult::inconclusive(&conditional.kind.to_string(), &subject(conditional), &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn and(expression: &str) -> Conditional {
        Conditional::new(ConditionalKind::And, expression, 0)
    }

    #[test]
    fn test_and_modifiers_present() {
        let result = check_conditional(
            &and("@Final = true() and @Static = true()"),
            "private static final X y;",
        );
        assert!(result.success);
        assert_eq!(result.message, "2/2 AND parts covered (modifiers: final, static)");
        assert_eq!(result.evidence.len(), 1);
        assert_eq!(result.evidence[0].count, 1);
    }

    #[test]
    fn test_and_modifier_missing() {
        let result = check_conditional(
            &and("@Final = true() and @Static = true()"),
            "private final X y;",
        );
        assert!(!result.success);
        assert!(!result.is_inconclusive());
        assert_eq!(result.evidence[0].count, 0);
        assert!(result.message.contains("static"));
        assert_eq!(result.uncovered_branches(), vec!["and: static"]);
    }

    #[test]
    fn test_and_names_exactly_the_unsatisfied_part() {
        let result = check_conditional(
            &and("@Name = 'foo' and @Static = true() and .//MethodCallExpression"),
            "static void foo() {}",
        );
        assert!(!result.success);
        assert_eq!(
            result.uncovered_branches(),
            vec!["and: .//MethodCallExpression"]
        );
        let summary = result.evidence.last().unwrap();
        assert_eq!((summary.count, summary.required), (2, 3));
    }

    #[test]
    fn test_and_all_parts_covered() {
        let result = check_conditional(
            &and("@Name = 'foo' and .//MethodCallExpression"),
            "void foo() { bar(); }",
        );
        assert!(result.success);
        assert_eq!(result.message, "2/2 AND parts covered");
        assert!(result.details.unsatisfied.is_empty());
    }

    #[test]
    fn test_and_empty_expression() {
        let result = check_conditional(&and("   "), "anything");
        assert!(!result.success);
        assert!(result.evidence.is_empty());
        assert!(result.message.contains("nothing to check"));
    }

    #[test]
    fn test_not_static_final_field() {
        let not = Conditional::new(
            ConditionalKind::Not,
            "not(ancestor::FieldDeclarationStatements[@Static = true() and @Final = true()])",
            0,
        );
        let hit = check_conditional(&not, "private static final Integer MAX = 5;\nInteger x = 5;");
        assert!(hit.success);
        assert_eq!(hit.evidence[0].count, 1);

        let miss = check_conditional(&not, "private static Integer max = 5;");
        assert!(!miss.success);
        assert!(!miss.is_inconclusive());
    }

    #[test]
    fn test_not_generic_keywords() {
        let not = Conditional::new(ConditionalKind::Not, "not(@Name = 'Test')", 0);
        assert!(check_conditional(&not, "@isTest class TestUtil {}").success);
        assert!(!check_conditional(&not, "class Util {}").success);
    }

    #[test]
    fn test_stubs_are_inconclusive() {
        for kind in [
            ConditionalKind::Or,
            ConditionalKind::If,
            ConditionalKind::Quantified,
            ConditionalKind::BooleanFunction,
        ] {
            let result = check_conditional(&Conditional::new(kind, "x", 0), "x");
            assert!(!result.success);
            assert!(result.is_inconclusive());
            assert!(result.evidence.is_empty());
            assert_eq!(
                result.message,
                format!("Coverage check not implemented for {} conditionals", kind)
            );
        }
    }

    #[test]
    fn test_extract_keywords() {
        let keywords =
            extract_keywords("ancestor::Method[@Name = 'run'] and count(./Foo) > 2 and $x = true()");
        assert_eq!(keywords, vec!["Method", "run", "Foo"]);
    }

    #[test]
    fn test_strategies_tolerate_garbage() {
        let weird = Conditional::new(ConditionalKind::And, "((( and ]]] and '", 0);
        let _ = check_conditional(&weird, "\u{0}\u{1}<<<");
        let weird = Conditional::new(ConditionalKind::Not, "not(", 0);
        let _ = check_conditional(&weird, "");
    }
}
