//! Verification orchestrator
//!
//! Per rule file: extract examples, then for every example synthesize a
//! fixture, run the engine and consult the oracle, then aggregate coverage.
//! Examples of a rule and rule files of a batch each run under their own
//! bounded pool.

use crate::ast::{associate, MarkerAssociation, NoSyntax, PmdAstDump, SyntaxProvider};
use crate::config::Config;
use crate::coverage::{aggregate, CoverageLedger};
use crate::engine::{EngineAdapter, PmdCli};
use crate::fixture::{ApexFixtureGenerator, FixtureGenerator, FixtureRequest};
use crate::markers::TestType;
use crate::oracle::{self, LineRecovery};
use crate::pool::run_bounded;
use crate::query::{self, QueryAnalysis};
use crate::report::{BatchFailure, BatchReport, ExampleTestResult, RuleTestReport};
use crate::rule_file::{Example, RuleFile, RuleFileError};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Reasons a rule file cannot be verified at all
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    RuleFile(#[from] RuleFileError),

    #[error("{0}: rule file has no examples")]
    NoExamples(PathBuf),

    #[error("{0}: no violation markers, at least one violation required")]
    NoViolations(PathBuf),
}

/// Outcome of one example
struct ExampleRun {
    results: Vec<ExampleTestResult>,
    associations: Vec<MarkerAssociation>,
}

/// Drives verification of rule files
pub struct Harness {
    engine: Box<dyn EngineAdapter>,
    fixtures: Box<dyn FixtureGenerator>,
    syntax: Box<dyn SyntaxProvider>,
    jobs: usize,
    example_jobs: usize,
    require_coverage: bool,
}

impl Harness {
    /// Harness with text-only association and host parallelism
    pub fn new(engine: Box<dyn EngineAdapter>, fixtures: Box<dyn FixtureGenerator>) -> Self {
        Self {
            engine,
            fixtures,
            syntax: Box::new(NoSyntax),
            jobs: num_cpus::get(),
            example_jobs: num_cpus::get(),
            require_coverage: false,
        }
    }

    /// Harness backed by the PMD command line
    pub fn from_config(config: &Config) -> Self {
        let engine = PmdCli::new(&config.pmd, config.engine.timeout_secs);
        let fixtures = ApexFixtureGenerator::new(&config.fixture);
        let syntax: Box<dyn SyntaxProvider> = if config.pmd.ast_dump {
            Box::new(PmdAstDump::new(
                &config.pmd.command,
                &config.pmd.language,
                config.engine.timeout_secs,
            ))
        } else {
            Box::new(NoSyntax)
        };

        Self::new(Box::new(engine), Box::new(fixtures))
            .with_syntax(syntax)
            .with_jobs(
                config.engine.effective_jobs(),
                config.engine.effective_example_jobs(),
            )
            .require_coverage(config.coverage.require_coverage)
    }

    pub fn with_syntax(mut self, syntax: Box<dyn SyntaxProvider>) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_jobs(mut self, jobs: usize, example_jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self.example_jobs = example_jobs.max(1);
        self
    }

    /// Also fail rules whose query is not conclusively covered
    pub fn require_coverage(mut self, require: bool) -> Self {
        self.require_coverage = require;
        self
    }

    /// Verify one rule file
    pub fn verify_file(&self, path: &Path) -> Result<RuleTestReport, VerifyError> {
        let rule = RuleFile::load(path)?;
        let recovery = LineRecovery::load(path);
        self.verify_rule(&rule, &recovery)
    }

    /// Verify an already parsed rule file
    pub fn verify_rule(
        &self,
        rule: &RuleFile,
        recovery: &LineRecovery,
    ) -> Result<RuleTestReport, VerifyError> {
        if rule.examples.is_empty() {
            return Err(VerifyError::NoExamples(rule.path.clone()));
        }
        if !rule.examples.iter().any(|e| e.has_markers(TestType::Violation)) {
            return Err(VerifyError::NoViolations(rule.path.clone()));
        }

        let start = Instant::now();
        let mut issues = Vec::new();
        if rule.metadata.query.is_none() {
            issues.push("Rule has no query; coverage analysis is empty".to_string());
        }
        for example in &rule.examples {
            if !example.has_markers(TestType::Violation) && !example.has_markers(TestType::Valid) {
                issues.push(format!("Example {} has no markers", example.index));
            }
        }

        let analysis = query::analyze(rule.metadata.query.as_deref());

        let runs = run_bounded(self.example_jobs, &rule.examples, |example| {
            self.run_example(&rule.path, example, &analysis, recovery)
        });

        let mut results = Vec::new();
        let mut associations = Vec::new();
        for run in runs {
            results.extend(run.results);
            associations.extend(run.associations);
        }

        let mut ledger = CoverageLedger::new();
        let coverage = aggregate(&analysis, &rule.examples, &mut ledger);

        let examples_passed = !results.is_empty() && results.iter().all(|r| r.passed);
        let coverage_ok = !self.require_coverage || coverage.conclusive_success();
        let passed = examples_passed && coverage_ok;

        log::debug!(
            "{}: {} result(s), coverage {}, {:?}",
            rule.path.display(),
            results.len(),
            if coverage.overall_success { "complete" } else { "partial" },
            start.elapsed()
        );

        Ok(RuleTestReport {
            rule_file: rule.path.clone(),
            metadata: rule.metadata.clone(),
            results,
            coverage,
            associations,
            issues,
            passed,
        })
    }

    fn run_example(
        &self,
        rule_path: &Path,
        example: &Example,
        analysis: &QueryAnalysis,
        recovery: &LineRecovery,
    ) -> ExampleRun {
        let mut run = ExampleRun {
            results: Vec::new(),
            associations: Vec::new(),
        };
        if !example.has_markers(TestType::Violation) && !example.has_markers(TestType::Valid) {
            return run;
        }

        let request = FixtureRequest {
            example_content: &example.content,
            example_index: example.index,
            include_violations: true,
            include_valids: true,
        };
        let fixture = match self.fixtures.generate(&request) {
            Ok(fixture) => fixture,
            Err(e) => {
                log::warn!("Example {}: {}", example.index, e);
                run.results = oracle::fail_all(example, &e.to_string(), recovery);
                return run;
            }
        };

        log::debug!(
            "Example {}: {} violation / {} valid marker(s) -> {}",
            example.index,
            fixture.violation_count,
            fixture.valid_count,
            fixture.file_path().display()
        );

        let outcome = self.engine.run(fixture.file_path(), rule_path);
        run.results = oracle::evaluate(example, &outcome, fixture.line_offset, recovery);

        if !analysis.node_types.is_empty() {
            if let Some(tree) = self.syntax.parse(fixture.file_path()) {
                for test_type in [TestType::Violation, TestType::Valid] {
                    run.associations.extend(associate(
                        &tree,
                        &example.content,
                        example.markers(test_type),
                        &analysis.node_types,
                        fixture.line_offset,
                        example.index,
                    ));
                }
            }
        }

        run
    }

    /// Verify many rule files; per-file errors are collected, never fatal
    pub fn verify_batch(&self, paths: &[PathBuf]) -> BatchReport {
        let start = Instant::now();
        let outcomes = run_bounded(self.jobs, paths, |path| (path.clone(), self.verify_file(path)));

        let mut batch = BatchReport::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(report) => batch.reports.push(report),
                Err(e) => {
                    log::warn!("{}", e);
                    batch.failures.push(BatchFailure {
                        rule_file: path,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Verified {} rule file(s): {} passed, {} failed, {} error(s) in {:?}",
            paths.len(),
            batch.passed_rules(),
            batch.reports.len() - batch.passed_rules(),
            batch.failures.len(),
            start.elapsed()
        );
        batch
    }
}
