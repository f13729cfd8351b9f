//! Test oracle
//!
//! Reconciles an example's markers with the violations the engine actually
//! reported. When a half fails, the rule file is re-read to recover the line
//! the failure most likely refers to.

use crate::engine::{EngineError, EngineReport, ToolViolation};
use crate::markers::{
    classify_line, is_comment_line, is_markup_line, marker_block, LineKind, Marker, MarkerSource,
    TestType,
};
use crate::report::ExampleTestResult;
use crate::rule_file::{example_bounds, Example};
use std::collections::BTreeSet;
use std::path::Path;

/// Best-effort mapping of failures back to rule-file lines
///
/// Every lookup failure degrades to `None`.
#[derive(Debug, Clone, Default)]
pub struct LineRecovery {
    text: Option<String>,
}

impl LineRecovery {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self { text: Some(text) },
            Err(e) => {
                log::warn!("Line recovery disabled for {}: {}", path.display(), e);
                Self { text: None }
            }
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    /// Rule-file line of the first executable line at or after a marker
    pub fn recover(&self, example_index: usize, marker: &Marker) -> Option<usize> {
        let text = self.text.as_deref()?;
        let (open, close) = example_bounds(text, example_index)?;
        let lines: Vec<&str> = text.lines().collect();

        let marker_line = open + marker.line_number - 1;
        if marker_line > close {
            return None;
        }

        if marker.source == MarkerSource::Inline && marker.code_span.is_some() {
            return Some(marker_line);
        }

        (marker_line + 1..=close).find(|&n| {
            lines
                .get(n - 1)
                .map(|line| is_executable(line))
                .unwrap_or(false)
        })
    }
}

fn is_executable(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !is_comment_line(trimmed) && !is_markup_line(trimmed)
}

/// Example lines a marker answers for: its own line plus its block
fn target_lines(content: &str, markers: &[Marker]) -> BTreeSet<usize> {
    markers
        .iter()
        .flat_map(|m| {
            let mut lines = marker_block(content, m.line_number);
            lines.push(m.line_number);
            lines
        })
        .collect()
}

/// Marker whose target lines contain the line
fn marker_for_line<'a>(content: &str, markers: &'a [Marker], line: usize) -> Option<&'a Marker> {
    markers.iter().find(|m| {
        m.line_number == line || marker_block(content, m.line_number).contains(&line)
    })
}

/// Example lines of the reported violations
fn example_lines(violations: &[ToolViolation], line_offset: usize) -> Vec<usize> {
    violations
        .iter()
        .filter_map(|v| v.line.checked_sub(line_offset).filter(|l| *l > 0))
        .collect()
}

/// Decide both halves of one example
///
/// A half without markers is skipped and yields no result.
pub fn evaluate(
    example: &Example,
    outcome: &Result<EngineReport, EngineError>,
    line_offset: usize,
    recovery: &LineRecovery,
) -> Vec<ExampleTestResult> {
    let mut results = Vec::with_capacity(2);

    for test_type in [TestType::Violation, TestType::Valid] {
        let markers = example.markers(test_type);
        let Some(first) = markers.first() else {
            continue;
        };

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                log::warn!("Example {} {} test: engine failed: {}", example.index, test_type, e);
                results.push(failed_half(example, test_type, first, &e.to_string(), recovery));
                continue;
            }
        };

        let targets = target_lines(&example.content, markers);
        let reported = example_lines(&report.violations, line_offset);
        let hits: Vec<usize> = reported
            .iter()
            .copied()
            .filter(|l| targets.contains(l))
            .collect();

        let result = match test_type {
            TestType::Violation => match hits.first() {
                Some(&line) => ExampleTestResult::pass(
                    example.index,
                    test_type,
                    Some(example.rule_file_line(line)),
                ),
                None => ExampleTestResult::fail(
                    example.index,
                    test_type,
                    recovery.recover(example.index, first),
                    missing_violation_reason(&targets, &reported),
                ),
            },
            TestType::Valid => match hits.first() {
                None => ExampleTestResult::pass(
                    example.index,
                    test_type,
                    recovery.recover(example.index, first),
                ),
                Some(&line) => {
                    let marker = marker_for_line(&example.content, markers, line).unwrap_or(first);
                    ExampleTestResult::fail(
                        example.index,
                        test_type,
                        recovery.recover(example.index, marker),
                        format!(
                            "Unexpected violation on example line {} ({})",
                            line,
                            describe_line(&example.content, line)
                        ),
                    )
                }
            },
        };
        results.push(result);
    }

    results
}

fn failed_half(
    example: &Example,
    test_type: TestType,
    marker: &Marker,
    reason: &str,
    recovery: &LineRecovery,
) -> ExampleTestResult {
    ExampleTestResult::fail(
        example.index,
        test_type,
        recovery.recover(example.index, marker),
        reason,
    )
}

/// Fail every half that would have run, e.g. when no fixture could be built
pub fn fail_all(example: &Example, reason: &str, recovery: &LineRecovery) -> Vec<ExampleTestResult> {
    [TestType::Violation, TestType::Valid]
        .into_iter()
        .filter_map(|test_type| {
            example
                .markers(test_type)
                .first()
                .map(|first| failed_half(example, test_type, first, reason, recovery))
        })
        .collect()
}

fn missing_violation_reason(targets: &BTreeSet<usize>, reported: &[usize]) -> String {
    let expected = targets
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if reported.is_empty() {
        format!("Expected a violation on example line(s) {}; none reported", expected)
    } else {
        let got = reported
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Expected a violation on example line(s) {}; reported on {}",
            expected, got
        )
    }
}

fn describe_line(content: &str, line: usize) -> String {
    match content.lines().nth(line - 1).map(classify_line) {
        Some(LineKind::Inline { code: Some(code), .. }) => code.to_string(),
        _ => content
            .lines()
            .nth(line - 1)
            .map(|l| l.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_file::RuleFile;

    const RULE: &str = r#"<rule name="NoDebug" message="No debug">
<example>
public class A {
    Integer x = 1;
    // ❌ debug call
    void run() {
        System.debug('x');
    }
    Integer y = MAX; // ✅
}
</example>
</rule>
"#;

    fn violation(line: usize) -> ToolViolation {
        ToolViolation {
            line,
            column: 1,
            rule: "NoDebug".to_string(),
            message: "No debug".to_string(),
            priority: 3,
        }
    }

    fn setup() -> (Example, LineRecovery) {
        let rule = RuleFile::parse(RULE, Path::new("r.xml")).unwrap();
        (rule.examples[0].clone(), LineRecovery::from_text(RULE))
    }

    fn find(results: &[ExampleTestResult], test_type: TestType) -> &ExampleTestResult {
        results.iter().find(|r| r.test_type == test_type).unwrap()
    }

    #[test]
    fn test_violation_on_marker_line_passes() {
        let (example, recovery) = setup();
        assert_eq!(example.violation_markers[0].line_number, 4);

        let outcome = Ok(EngineReport {
            violations: vec![violation(4)],
        });
        let results = evaluate(&example, &outcome, 0, &recovery);
        let v = find(&results, TestType::Violation);
        assert!(v.passed);
        assert_eq!(v.line_number, Some(5));
    }

    #[test]
    fn test_violation_elsewhere_fails_with_recovered_line() {
        let (example, recovery) = setup();
        let outcome = Ok(EngineReport {
            violations: vec![violation(9)],
        });
        let results = evaluate(&example, &outcome, 0, &recovery);
        let v = find(&results, TestType::Violation);
        assert!(!v.passed);
        // next executable line after the comment-only marker
        assert_eq!(v.line_number, Some(6));
        assert!(v.reason.as_deref().unwrap().contains("reported on 9"));
    }

    #[test]
    fn test_violation_in_block_passes() {
        let (example, recovery) = setup();
        let outcome = Ok(EngineReport {
            violations: vec![violation(6)],
        });
        let results = evaluate(&example, &outcome, 0, &recovery);
        assert!(find(&results, TestType::Violation).passed);
    }

    #[test]
    fn test_valid_hit_fails() {
        let (example, recovery) = setup();
        let outcome = Ok(EngineReport {
            violations: vec![violation(5), violation(8)],
        });
        let results = evaluate(&example, &outcome, 0, &recovery);
        let valid = find(&results, TestType::Valid);
        assert!(!valid.passed);
        assert_eq!(valid.line_number, Some(9));
        assert!(valid.reason.as_deref().unwrap().contains("Integer y = MAX;"));
    }

    #[test]
    fn test_line_offset_applied() {
        let (example, recovery) = setup();
        let outcome = Ok(EngineReport {
            violations: vec![violation(5)],
        });
        let results = evaluate(&example, &outcome, 1, &recovery);
        assert!(find(&results, TestType::Violation).passed);
        assert!(find(&results, TestType::Valid).passed);
    }

    #[test]
    fn test_engine_failure_fails_both_halves() {
        let (example, recovery) = setup();
        let outcome = Err(EngineError::Timeout(30));
        let results = evaluate(&example, &outcome, 0, &recovery);

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.passed));
        let v = find(&results, TestType::Violation);
        assert_eq!(v.line_number, Some(6));
        assert_eq!(v.reason.as_deref(), Some("Engine timed out after 30s"));
        assert_eq!(find(&results, TestType::Valid).line_number, Some(9));
    }

    #[test]
    fn test_fail_all() {
        let (example, recovery) = setup();
        let results = fail_all(&example, "fixture: disk full", &recovery);
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| !r.passed && r.reason.as_deref() == Some("fixture: disk full")));
    }

    #[test]
    fn test_half_without_markers_is_skipped() {
        let example = Example::new(1, "foo(); // ❌", 1, None);
        let outcome = Ok(EngineReport {
            violations: vec![violation(1)],
        });
        let results = evaluate(&example, &outcome, 0, &LineRecovery::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_type, TestType::Violation);
        assert!(results[0].passed);
    }

    #[test]
    fn test_recovery_soft_failures() {
        let (example, _) = setup();
        let marker = &example.violation_markers[0];

        assert_eq!(LineRecovery::default().recover(1, marker), None);
        assert_eq!(LineRecovery::from_text(RULE).recover(2, marker), None);
        assert_eq!(LineRecovery::from_text("<rule><example>").recover(1, marker), None);
        assert_eq!(
            LineRecovery::load(Path::new("/nonexistent/rule.xml")).recover(1, marker),
            None
        );
    }

    #[test]
    fn test_recovery_without_following_code() {
        let text = "<rule>\n<example>\n// ❌ nothing follows\n\n</example>\n</rule>";
        let rule = RuleFile::parse(text, Path::new("r.xml")).unwrap();
        let marker = &rule.examples[0].violation_markers[0];
        assert_eq!(LineRecovery::from_text(text).recover(1, marker), None);
    }
}
