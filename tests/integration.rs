//! Integration tests for rulecov

use pretty_assertions::assert_eq;
use rulecov::{
    config::FixtureConfig,
    engine::{EngineAdapter, EngineError, EngineReport, ToolViolation},
    fixture::ApexFixtureGenerator,
    harness::{Harness, VerifyError},
    markers::TestType,
    output::{JsonFormatter, OutputFormatter},
    report::RuleTestReport,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn violation(line: usize) -> ToolViolation {
    ToolViolation {
        line,
        column: 1,
        rule: "Test".to_string(),
        message: "flagged".to_string(),
        priority: 3,
    }
}

/// Reports a violation on every fixture line carrying a violation marker
struct MarkerEngine;

impl EngineAdapter for MarkerEngine {
    fn run(&self, fixture: &Path, _rule: &Path) -> Result<EngineReport, EngineError> {
        let text = std::fs::read_to_string(fixture)?;
        Ok(EngineReport {
            violations: text
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains('❌'))
                .map(|(i, _)| violation(i + 1))
                .collect(),
        })
    }
}

/// Reports a violation on every non-blank fixture line
struct NoisyEngine;

impl EngineAdapter for NoisyEngine {
    fn run(&self, fixture: &Path, _rule: &Path) -> Result<EngineReport, EngineError> {
        let text = std::fs::read_to_string(fixture)?;
        Ok(EngineReport {
            violations: text
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, _)| violation(i + 1))
                .collect(),
        })
    }
}

/// Reports nothing and counts invocations
struct SilentEngine(Arc<AtomicUsize>);

impl EngineAdapter for SilentEngine {
    fn run(&self, _fixture: &Path, _rule: &Path) -> Result<EngineReport, EngineError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(EngineReport::default())
    }
}

struct TimeoutEngine;

impl EngineAdapter for TimeoutEngine {
    fn run(&self, _fixture: &Path, _rule: &Path) -> Result<EngineReport, EngineError> {
        Err(EngineError::Timeout(5))
    }
}

fn harness(engine: impl EngineAdapter + 'static) -> Harness {
    Harness::new(
        Box::new(engine),
        Box::new(ApexFixtureGenerator::new(&FixtureConfig::default())),
    )
    .with_jobs(4, 4)
}

fn verify(engine: impl EngineAdapter + 'static, name: &str) -> RuleTestReport {
    harness(engine)
        .verify_file(&fixtures_path().join(name))
        .unwrap()
}

#[test]
fn test_violation_on_marked_line_passes() {
    let report = verify(MarkerEngine, "PublicMethod.xml");

    assert!(report.passed, "{:?}", report.results);
    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.test_type, TestType::Violation);
    assert_eq!(result.line_number, Some(10));
    assert_eq!(report.display_name(), "AvoidPublicMethods");
}

#[test]
fn test_missing_violation_fails_but_coverage_stands() {
    let calls = Arc::new(AtomicUsize::new(0));
    let report = verify(SilentEngine(calls.clone()), "PublicMethod.xml");

    assert!(!report.passed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let result = &report.results[0];
    assert!(!result.passed);
    assert_eq!(result.line_number, Some(10));
    assert!(result.reason.as_deref().unwrap().contains("none reported"));

    let node_types = report
        .coverage
        .coverage
        .iter()
        .find(|r| r.details.category == "node type")
        .unwrap();
    assert!(node_types.success, "{}", node_types.message);
}

#[test]
fn test_and_conditional_covered_by_examples() {
    let report = verify(MarkerEngine, "StaticFinalField.xml");

    assert!(report.passed, "{:?}", report.results);
    assert_eq!(report.results.len(), 2);
    let and = report
        .coverage
        .coverage
        .iter()
        .find(|r| r.details.category == "and")
        .unwrap();
    assert!(and.success, "{}", and.message);
}

#[test]
fn test_valid_violation_reports_rule_file_line() {
    let report = verify(NoisyEngine, "StaticFinalField.xml");

    assert!(!report.passed);
    let violation = report
        .results
        .iter()
        .find(|r| r.test_type == TestType::Violation)
        .unwrap();
    assert!(violation.passed);
    assert_eq!(violation.line_number, Some(11));

    let valid = report
        .results
        .iter()
        .find(|r| r.test_type == TestType::Valid)
        .unwrap();
    assert!(!valid.passed);
    assert_eq!(valid.line_number, Some(12));
    assert!(valid
        .reason
        .as_deref()
        .unwrap()
        .contains("private final Integer count = 0;"));
}

#[test]
fn test_engine_timeout_fails_halves() {
    let report = verify(TimeoutEngine, "StaticFinalField.xml");

    assert!(!report.passed);
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert!(!result.passed);
        assert_eq!(result.reason.as_deref(), Some("Engine timed out after 5s"));
    }
}

#[test]
fn test_no_examples_rejected_before_engine_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let result = harness(SilentEngine(calls.clone()))
        .verify_file(&fixtures_path().join("NoExamples.xml"));

    assert!(matches!(result, Err(VerifyError::NoExamples(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_batch_is_independent_of_concurrency() {
    let paths: Vec<PathBuf> = [
        "PublicMethod.xml",
        "StaticFinalField.xml",
        "NoExamples.xml",
        "PublicMethod.xml",
        "StaticFinalField.xml",
    ]
    .iter()
    .map(|name| fixtures_path().join(name))
    .collect();

    let sequential = harness(MarkerEngine).with_jobs(1, 1).verify_batch(&paths);
    let parallel = harness(MarkerEngine).with_jobs(4, 4).verify_batch(&paths);

    assert_eq!(sequential.reports.len(), 4);
    assert_eq!(sequential.failures.len(), 1);
    assert_eq!(sequential.exit_code(), 2);

    let formatter = JsonFormatter::new();
    assert_eq!(formatter.format(&sequential), formatter.format(&parallel));
}

#[test]
fn test_examples_are_independent_of_concurrency() {
    let path = fixtures_path().join("ManyExamples.xml");
    let sequential = harness(NoisyEngine).with_jobs(1, 1).verify_file(&path).unwrap();
    let parallel = harness(NoisyEngine).with_jobs(1, 6).verify_file(&path).unwrap();

    assert_eq!(sequential.results.len(), 9);
    let failed: Vec<usize> = sequential
        .failed_results()
        .map(|r| r.example_index)
        .collect();
    assert_eq!(failed, vec![2, 5, 6]);
    assert!(sequential
        .failed_results()
        .all(|r| r.test_type == TestType::Valid));

    assert_eq!(sequential.results, parallel.results);
    assert_eq!(sequential.coverage.redundant, parallel.coverage.redundant);
    assert_eq!(
        sequential.coverage.uncovered_branches,
        parallel.coverage.uncovered_branches
    );
}
