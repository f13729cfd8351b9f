//! Branch coverage of rule queries
//!
//! Coverage is inferred from text, never by evaluating the query:
//!
//! - [`strategies`] decides whether one classified conditional is exercised
//! - [`nodes`] decides whether referenced node types and attributes occur
//! - [`aggregate`] combines both across all examples of a rule

pub mod aggregate;
pub mod nodes;
pub mod strategies;

use serde::{Deserialize, Serialize};

pub use aggregate::{aggregate, CoverageLedger, RedundantBranch, RuleCoverageResult};
pub use nodes::{check_attributes, check_node_types, node_type_covered};
pub use strategies::check_conditional;

/// One unit of proof (or disproof) of coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEvidence {
    pub kind: String,
    pub description: String,
    pub count: usize,
    pub required: usize,
}

impl CoverageEvidence {
    pub fn new(kind: &str, description: &str, count: usize, required: usize) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            count,
            required,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.count >= self.required
    }
}

/// What a coverage result talks about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageDetails {
    /// Branch family, e.g. "and", "node type"
    pub category: String,
    /// Human-readable identifier of the checked branch
    pub subject: String,
    /// Named sub-branches that were not exercised
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsatisfied: Vec<String>,
    /// The checker could not decide (no heuristic, nothing to look for)
    #[serde(default)]
    pub inconclusive: bool,
}

/// Coverage verdict for one conditional, node-type set or attribute set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub success: bool,
    pub message: String,
    pub evidence: Vec<CoverageEvidence>,
    pub details: CoverageDetails,
}

impl CoverageResult {
    pub fn covered(category: &str, subject: &str, message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            evidence: Vec::new(),
            details: CoverageDetails {
                category: category.to_string(),
                subject: subject.to_string(),
                ..CoverageDetails::default()
            },
        }
    }

    pub fn uncovered(category: &str, subject: &str, message: &str) -> Self {
        Self {
            success: false,
            ..Self::covered(category, subject, message)
        }
    }

    /// Heuristic ambiguity, distinguishable from a genuine negative
    pub fn inconclusive(category: &str, subject: &str, message: &str) -> Self {
        let mut result = Self::uncovered(category, subject, message);
        result.details.inconclusive = true;
        result
    }

    pub fn with_evidence(mut self, evidence: CoverageEvidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_unsatisfied(mut self, parts: Vec<String>) -> Self {
        self.details.unsatisfied = parts;
        self
    }

    pub fn is_inconclusive(&self) -> bool {
        !self.success && self.details.inconclusive
    }

    /// Identifiers of the branches this result leaves uncovered
    pub fn uncovered_branches(&self) -> Vec<String> {
        if self.success {
            return Vec::new();
        }
        if self.details.unsatisfied.is_empty() {
            return vec![self.details.subject.clone()];
        }
        self.details
            .unsatisfied
            .iter()
            .map(|part| format!("{}: {}", self.details.category, part))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_satisfied() {
        assert!(CoverageEvidence::new("k", "d", 2, 2).is_satisfied());
        assert!(CoverageEvidence::new("k", "d", 3, 2).is_satisfied());
        assert!(!CoverageEvidence::new("k", "d", 0, 1).is_satisfied());
    }

    #[test]
    fn test_uncovered_branches_prefers_parts() {
        let result = CoverageResult::uncovered("and", "and: a and b", "1/2")
            .with_unsatisfied(vec!["b".to_string()]);
        assert_eq!(result.uncovered_branches(), vec!["and: b"]);

        let result = CoverageResult::uncovered("or", "or: a or b", "stub");
        assert_eq!(result.uncovered_branches(), vec!["or: a or b"]);

        let result = CoverageResult::covered("and", "and: a", "ok");
        assert!(result.uncovered_branches().is_empty());
    }

    #[test]
    fn test_inconclusive() {
        let result = CoverageResult::inconclusive("or", "or: x", "not implemented");
        assert!(!result.success);
        assert!(result.is_inconclusive());
    }
}
