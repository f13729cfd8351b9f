//! Rulecov - Coverage-guided verification harness for PMD XPath rules
//!
//! A rule file carries an XPath query and `<example>` blocks whose lines are
//! marked as expected violations (❌) or valid code (✅). Rulecov runs the
//! real engine over a fixture built from every example, checks that the
//! reported violations land exactly on the marked lines, and estimates how
//! much of the query the examples exercise.
//!
//! # Architecture
//!
//! ```text
//! CLI -> Harness -> RuleFile -> Example -> Fixture -> Engine -> Oracle
//!                      \-> QueryAnalysis -> Coverage aggregation
//! ```
//!
//! Coverage is a text heuristic. Results the heuristics cannot decide are
//! reported as inconclusive instead of covered or uncovered.

pub mod ast;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod fixture;
pub mod harness;
pub mod markers;
pub mod oracle;
pub mod output;
pub mod pool;
pub mod query;
pub mod report;
pub mod rule_file;

// Re-export main types
pub use ast::{AstNode, MarkerAssociation, NoSyntax, PmdAstDump, SyntaxProvider};
pub use config::Config;
pub use coverage::{
    CoverageEvidence, CoverageLedger, CoverageResult, RedundantBranch, RuleCoverageResult,
};
pub use engine::{EngineAdapter, EngineError, EngineReport, PmdCli, ToolViolation};
pub use fixture::{ApexFixtureGenerator, Fixture, FixtureGenerator, FixtureRequest};
pub use harness::{Harness, VerifyError};
pub use markers::{extract_markers, ExtractedMarkers, Marker, MarkerSource, TestType};
pub use oracle::LineRecovery;
pub use output::{JsonFormatter, OutputFormatter, TextFormatter};
pub use query::{analyze, Conditional, ConditionalKind, QueryAnalysis};
pub use report::{BatchFailure, BatchReport, ExampleTestResult, RuleTestReport};
pub use rule_file::{Example, RuleFile, RuleFileError, RuleMetadata};
