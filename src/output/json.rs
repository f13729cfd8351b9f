//! JSON output formatter

use super::OutputFormatter;
use crate::report::{BatchFailure, BatchReport, RuleTestReport};
use serde::Serialize;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    /// Pretty print with indentation
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    reports: &'a [RuleTestReport],
    failures: &'a [BatchFailure],
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonSummary {
    rule_files: usize,
    passed: usize,
    failed: usize,
    errors: usize,
    exit_code: i32,
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, batch: &BatchReport) -> String {
        let passed = batch.passed_rules();
        let output = JsonOutput {
            reports: &batch.reports,
            failures: &batch.failures,
            summary: JsonSummary {
                rule_files: batch.reports.len() + batch.failures.len(),
                passed,
                failed: batch.reports.len() - passed,
                errors: batch.failures.len(),
                exit_code: batch.exit_code(),
            },
        };

        if self.pretty {
            serde_json::to_string_pretty(&output).unwrap_or_default()
        } else {
            serde_json::to_string(&output).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::RuleCoverageResult;
    use crate::markers::TestType;
    use crate::report::ExampleTestResult;
    use crate::rule_file::RuleMetadata;
    use std::path::PathBuf;

    #[test]
    fn test_json_summary() {
        let batch = BatchReport {
            reports: vec![RuleTestReport {
                rule_file: PathBuf::from("Rule.xml"),
                metadata: RuleMetadata::default(),
                results: vec![ExampleTestResult::pass(1, TestType::Violation, Some(7))],
                coverage: RuleCoverageResult::default(),
                associations: Vec::new(),
                issues: Vec::new(),
                passed: true,
            }],
            failures: vec![BatchFailure {
                rule_file: PathBuf::from("Broken.xml"),
                error: "Broken.xml: rule file has no examples".to_string(),
            }],
        };

        let output = JsonFormatter::new().format(&batch);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["summary"]["rule_files"], 2);
        assert_eq!(value["summary"]["passed"], 1);
        assert_eq!(value["summary"]["errors"], 1);
        assert_eq!(value["summary"]["exit_code"], 2);
        assert_eq!(value["reports"][0]["results"][0]["line_number"], 7);
        assert!(value["reports"][0].get("associations").is_none());
    }
}
