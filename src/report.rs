//! Verification reports

use crate::ast::MarkerAssociation;
use crate::coverage::RuleCoverageResult;
use crate::markers::TestType;
use crate::rule_file::RuleMetadata;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Oracle verdict for one half of one example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleTestResult {
    pub example_index: usize,
    pub test_type: TestType,
    pub passed: bool,
    /// Best-effort rule-file line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExampleTestResult {
    pub fn pass(example_index: usize, test_type: TestType, line_number: Option<usize>) -> Self {
        Self {
            example_index,
            test_type,
            passed: true,
            line_number,
            reason: None,
        }
    }

    pub fn fail(
        example_index: usize,
        test_type: TestType,
        line_number: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            example_index,
            test_type,
            passed: false,
            line_number,
            reason: Some(reason.into()),
        }
    }
}

/// Final verdict for one rule file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTestReport {
    pub rule_file: PathBuf,
    pub metadata: RuleMetadata,
    pub results: Vec<ExampleTestResult>,
    pub coverage: RuleCoverageResult,
    /// Syntax-tree refinements, empty in text-only mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associations: Vec<MarkerAssociation>,
    /// Recovered input problems (missing query, ...)
    pub issues: Vec<String>,
    pub passed: bool,
}

impl RuleTestReport {
    pub fn failed_results(&self) -> impl Iterator<Item = &ExampleTestResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Display name: rule name, else the file name
    pub fn display_name(&self) -> String {
        self.metadata.rule_name.clone().unwrap_or_else(|| {
            self.rule_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.rule_file.display().to_string())
        })
    }
}

/// A rule file that could not be verified at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub rule_file: PathBuf,
    pub error: String,
}

/// Result of verifying many rule files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<RuleTestReport>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn passed_rules(&self) -> usize {
        self.reports.iter().filter(|r| r.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failures.is_empty() && self.reports.iter().all(|r| r.passed)
    }

    /// 0 all passed, 1 any rule failed, 2 some rule files could not be verified
    pub fn exit_code(&self) -> i32 {
        if !self.failures.is_empty() {
            2
        } else if self.reports.iter().any(|r| !r.passed) {
            1
        } else {
            0
        }
    }
}
