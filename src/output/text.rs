//! Human-readable text output formatter

use super::OutputFormatter;
use crate::coverage::CoverageResult;
use crate::report::{BatchReport, ExampleTestResult, RuleTestReport};
use colored::*;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// List every coverage result and redundant branch, not only gaps
    pub verbose: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            verbose: false,
        }
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    fn paint(&self, s: &str, f: fn(&str) -> ColoredString) -> String {
        if self.colored {
            f(s).to_string()
        } else {
            s.to_string()
        }
    }

    fn verdict(&self, passed: bool) -> String {
        if passed {
            self.paint("PASS", |s| s.green().bold())
        } else {
            self.paint("FAIL", |s| s.red().bold())
        }
    }

    fn format_result(&self, result: &ExampleTestResult) -> String {
        let location = match result.line_number {
            Some(line) => format!(" (line {})", line),
            None => String::new(),
        };
        let mut line = format!(
            "  {} example {} {} test{}",
            self.verdict(result.passed),
            result.example_index,
            result.test_type,
            location
        );
        if let Some(reason) = &result.reason {
            line.push_str(&format!(": {}", reason));
        }
        line.push('\n');
        line
    }

    fn coverage_mark(&self, result: &CoverageResult) -> String {
        if result.success {
            self.paint("covered", |s| s.green())
        } else if result.is_inconclusive() {
            self.paint("inconclusive", |s| s.yellow())
        } else {
            self.paint("uncovered", |s| s.red())
        }
    }

    fn format_report(&self, report: &RuleTestReport) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{} {} ({})\n",
            self.verdict(report.passed),
            self.paint(&report.display_name(), |s| s.bold()),
            report.rule_file.display()
        ));

        for issue in &report.issues {
            output.push_str(&format!("  {}: {}\n", self.paint("note", |s| s.blue()), issue));
        }

        if self.verbose {
            for result in &report.results {
                output.push_str(&self.format_result(result));
            }
        } else {
            for result in report.failed_results() {
                output.push_str(&self.format_result(result));
            }
        }
        output.push_str(&format!(
            "  {}/{} example tests passed\n",
            report.passed_count(),
            report.results.len()
        ));

        let coverage = &report.coverage;
        if !coverage.coverage.is_empty() {
            output.push_str(&format!(
                "  Coverage: {}/{} covered, {} inconclusive\n",
                coverage.covered_count(),
                coverage.coverage.len(),
                coverage.inconclusive_count()
            ));
            for result in &coverage.coverage {
                if self.verbose || !result.success {
                    output.push_str(&format!(
                        "    [{}] {}: {}\n",
                        self.coverage_mark(result),
                        result.details.subject,
                        result.message
                    ));
                }
            }
        }

        if self.verbose {
            for branch in &coverage.redundant {
                output.push_str(&format!(
                    "    {} example {} {} repeats {} ({}) from example {}{}\n",
                    self.paint("redundant", |s| s.dimmed()),
                    branch.example_index,
                    branch.section,
                    branch.branch,
                    branch.discriminator,
                    branch.first_covered_by,
                    if branch.precise { "" } else { " [approximate]" }
                ));
            }
            for association in &report.associations {
                output.push_str(&format!(
                    "    example {} marker line {} -> {}{}\n",
                    association.example_index,
                    association.marker_line,
                    association.node_type,
                    association
                        .detail
                        .as_ref()
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                ));
            }
        }

        output
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, batch: &BatchReport) -> String {
        let mut output = String::new();

        for report in &batch.reports {
            output.push_str(&self.format_report(report));
            output.push('\n');
        }

        for failure in &batch.failures {
            output.push_str(&format!(
                "{}: {}\n",
                self.paint("error", |s| s.red().bold()),
                failure.error
            ));
        }

        let total = batch.reports.len() + batch.failures.len();
        let passed = batch.passed_rules();
        let mut counts = vec![self.paint(&format!("{} passed", passed), |s| s.green())];
        if batch.reports.len() > passed {
            counts.push(self.paint(&format!("{} failed", batch.reports.len() - passed), |s| s.red()));
        }
        if !batch.failures.is_empty() {
            counts.push(self.paint(
                &format!(
                    "{} {}",
                    batch.failures.len(),
                    if batch.failures.len() == 1 { "error" } else { "errors" }
                ),
                |s| s.red(),
            ));
        }

        output.push_str(&format!(
            "\n{} rule {} verified: {}\n",
            total,
            if total == 1 { "file" } else { "files" },
            counts.join(", ")
        ));

        output
    }
}
