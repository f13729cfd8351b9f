//! Rule-level coverage aggregation

use super::nodes::{
    call_names, check_attributes, check_node_types, node_type_covered, BOILERPLATE_NODE_TYPE,
};
use super::strategies::check_conditional;
use super::CoverageResult;
use crate::markers::TestType;
use crate::query::QueryAnalysis;
use crate::rule_file::Example;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node type whose redundancy is tracked per call name
const CALL_NODE_TYPE: &str = "MethodCallExpression";

/// Branches already satisfied during one rule run
///
/// Keyed by branch, section type and discriminating detail; the value is the
/// first example that satisfied the key.
#[derive(Debug, Default)]
pub struct CoverageLedger {
    seen: HashMap<(String, TestType, String), usize>,
}

impl CoverageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `example` satisfies the key
    ///
    /// Returns the earlier example that already satisfied it, if any.
    pub fn record(
        &mut self,
        branch: &str,
        section: TestType,
        discriminator: &str,
        example: usize,
    ) -> Option<usize> {
        let key = (branch.to_string(), section, discriminator.to_string());
        match self.seen.get(&key) {
            Some(&first) if first != example => Some(first),
            Some(_) => None,
            None => {
                self.seen.insert(key, example);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// A branch an example re-covers without adding anything new
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundantBranch {
    pub branch: String,
    pub example_index: usize,
    pub section: TestType,
    pub discriminator: String,
    pub first_covered_by: usize,
    /// False when the discriminator is only a coarse per-kind guess
    pub precise: bool,
}

/// Coverage verdict for a whole rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCoverageResult {
    pub coverage: Vec<CoverageResult>,
    pub uncovered_branches: Vec<String>,
    pub overall_success: bool,
    pub redundant: Vec<RedundantBranch>,
}

impl RuleCoverageResult {
    pub fn from_results(coverage: Vec<CoverageResult>, redundant: Vec<RedundantBranch>) -> Self {
        let overall_success = coverage.iter().all(|r| r.success);
        let uncovered_branches = coverage
            .iter()
            .flat_map(|r| r.uncovered_branches())
            .collect();
        Self {
            coverage,
            uncovered_branches,
            overall_success,
            redundant,
        }
    }

    /// Success ignoring results the heuristics could not decide
    pub fn conclusive_success(&self) -> bool {
        self.coverage
            .iter()
            .all(|r| r.success || r.is_inconclusive())
            && self.coverage.iter().any(|r| r.success)
    }

    pub fn covered_count(&self) -> usize {
        self.coverage.iter().filter(|r| r.success).count()
    }

    pub fn inconclusive_count(&self) -> usize {
        self.coverage.iter().filter(|r| r.is_inconclusive()).count()
    }
}

/// Combine all coverage checks of one rule
pub fn aggregate(
    analysis: &QueryAnalysis,
    examples: &[Example],
    ledger: &mut CoverageLedger,
) -> RuleCoverageResult {
    let mut coverage = Vec::new();

    for conditional in &analysis.conditionals {
        let best = examples
            .iter()
            .map(|example| check_conditional(conditional, &example.content))
            .reduce(better)
            .unwrap_or_else(|| check_conditional(conditional, ""));
        coverage.push(best);
    }

    let joined = examples
        .iter()
        .map(|e| e.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    coverage.extend(check_node_types(analysis, &joined));
    coverage.extend(check_attributes(analysis, &joined));

    let redundant = find_redundant(analysis, examples, ledger);
    if !redundant.is_empty() {
        log::debug!("{} redundant branch(es) across examples", redundant.len());
    }

    RuleCoverageResult::from_results(coverage, redundant)
}

/// First success wins; otherwise the result leaving fewer parts unsatisfied
fn better(current: CoverageResult, candidate: CoverageResult) -> CoverageResult {
    if current.success {
        return current;
    }
    if candidate.success {
        return candidate;
    }
    let unsatisfied = |r: &CoverageResult| {
        if r.details.unsatisfied.is_empty() {
            usize::MAX
        } else {
            r.details.unsatisfied.len()
        }
    };
    if unsatisfied(&candidate) < unsatisfied(&current) {
        candidate
    } else {
        current
    }
}

fn find_redundant(
    analysis: &QueryAnalysis,
    examples: &[Example],
    ledger: &mut CoverageLedger,
) -> Vec<RedundantBranch> {
    let mut redundant = Vec::new();

    for example in examples {
        for section in [TestType::Violation, TestType::Valid] {
            if !example.has_markers(section) {
                continue;
            }
            let content = example.section_content(section);

            for (branch, discriminator, precise) in satisfied_branches(analysis, &content) {
                if let Some(first) = ledger.record(&branch, section, &discriminator, example.index) {
                    redundant.push(RedundantBranch {
                        branch,
                        example_index: example.index,
                        section,
                        discriminator,
                        first_covered_by: first,
                        precise,
                    });
                }
            }
        }
    }

    redundant
}

/// `(branch, discriminator, precise)` for every branch the text satisfies
fn satisfied_branches(analysis: &QueryAnalysis, content: &str) -> Vec<(String, String, bool)> {
    let mut branches = Vec::new();

    for conditional in &analysis.conditionals {
        let result = check_conditional(conditional, content);
        if result.success {
            branches.push((result.details.subject, conditional.kind.to_string(), false));
        }
    }

    for node_type in &analysis.node_types {
        if node_type == BOILERPLATE_NODE_TYPE {
            continue;
        }
        if node_type == CALL_NODE_TYPE {
            for name in call_names(content) {
                branches.push((format!("node type: {}", node_type), name, true));
            }
        } else if node_type_covered(node_type, content) {
            branches.push((format!("node type: {}", node_type), node_type.clone(), false));
        }
    }

    branches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyze;

    fn example(index: usize, content: &str, query: &str) -> Example {
        Example::new(index, content, 1, Some(query))
    }

    #[test]
    fn test_ledger_records_first_example() {
        let mut ledger = CoverageLedger::new();
        assert_eq!(ledger.record("b", TestType::Violation, "d", 1), None);
        assert_eq!(ledger.record("b", TestType::Violation, "d", 1), None);
        assert_eq!(ledger.record("b", TestType::Violation, "d", 2), Some(1));
        assert_eq!(ledger.record("b", TestType::Valid, "d", 2), None);
        assert_eq!(ledger.record("b", TestType::Violation, "other", 3), None);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_overall_success_requires_every_result() {
        let query = "//Method[@Final = true() and @Static = true()]";
        let examples = vec![example(1, "private static final void m() {} // ❌", query)];
        let result = aggregate(&analyze(Some(query)), &examples, &mut CoverageLedger::new());
        assert!(result.overall_success, "{:?}", result.uncovered_branches);
        assert!(result.uncovered_branches.is_empty());
    }

    #[test]
    fn test_best_example_wins() {
        let query = "//Field[@Final = true() and @Static = true()]";
        let examples = vec![
            example(1, "private final X y; // ❌", query),
            example(2, "private static final X y; // ❌", query),
        ];
        let result = aggregate(&analyze(Some(query)), &examples, &mut CoverageLedger::new());
        assert!(result.coverage[0].success);
    }

    #[test]
    fn test_uncovered_branches_in_stable_order() {
        let query = "//Method[@Final = true() and @Static = true()]//SoqlExpression";
        let examples = vec![example(1, "private final void m() {} // ❌", query)];
        let result = aggregate(&analyze(Some(query)), &examples, &mut CoverageLedger::new());

        assert!(!result.overall_success);
        assert_eq!(
            result.uncovered_branches,
            vec!["and: static", "node type: SoqlExpression", "attribute: @Static"]
        );
    }

    #[test]
    fn test_no_examples_still_reports() {
        let analysis = analyze(Some("//Method[@Visibility = 'public']"));
        let result = aggregate(&analysis, &[], &mut CoverageLedger::new());
        assert!(!result.overall_success);
        assert!(!result.coverage.is_empty());
    }

    #[test]
    fn test_redundant_call_name() {
        let query = "//MethodCallExpression[@FullMethodName = 'System.debug']";
        let examples = vec![
            example(1, "System.debug(1); // ❌", query),
            example(2, "System.debug(2); // ❌", query),
            example(3, "Logger.log(3); // ❌", query),
            example(4, "System.debug(4); // ✅", query),
        ];
        let result = aggregate(&analyze(Some(query)), &examples, &mut CoverageLedger::new());

        assert_eq!(result.redundant.len(), 1);
        let r = &result.redundant[0];
        assert_eq!(r.example_index, 2);
        assert_eq!(r.first_covered_by, 1);
        assert_eq!(r.discriminator, "system.debug");
        assert_eq!(r.section, TestType::Violation);
        assert!(r.precise);
    }

    #[test]
    fn test_redundancy_does_not_change_verdict() {
        let query = "//Method";
        let one = vec![example(1, "void a() {} // ❌", query)];
        let two = vec![
            example(1, "void a() {} // ❌", query),
            example(2, "void b() {} // ❌", query),
        ];
        let analysis = analyze(Some(query));
        let r1 = aggregate(&analysis, &one, &mut CoverageLedger::new());
        let r2 = aggregate(&analysis, &two, &mut CoverageLedger::new());

        assert_eq!(r1.overall_success, r2.overall_success);
        assert_eq!(r1.uncovered_branches, r2.uncovered_branches);
        assert!(r1.redundant.is_empty());
        assert_eq!(r2.redundant.len(), 1);
        assert!(!r2.redundant[0].precise);
    }

    #[test]
    fn test_conclusive_success_ignores_inconclusive() {
        let query = "//Method[@Name = 'a' or @Name = 'b']";
        let examples = vec![example(1, "void a() {} // ❌", query)];
        let result = aggregate(&analyze(Some(query)), &examples, &mut CoverageLedger::new());

        assert!(!result.overall_success);
        assert_eq!(result.inconclusive_count(), 1);
        assert!(result.conclusive_success());
    }
}
