//! Rubric definitions and evaluation results
//!
//! A rubric is a weighted set of criteria evaluated against a node output.
//! The overall score is the weight-normalized sum of criterion scores,
//! clamped to `[0, 100]`; the rubric passes when the score reaches
//! `passThreshold` and every `required` criterion passed individually.

use serde::{Deserialize, Serialize};

/// Quality gate attached to a node via `rubricId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rubric {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Free-form classification (e.g. "code-quality", "prose").
    #[serde(rename = "type", default)]
    pub rubric_type: String,
    /// Score in `[0, 100]` required to pass.
    pub pass_threshold: f64,
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    /// Structural validity: threshold in range, non-empty criteria,
    /// non-negative weights, per-criterion min scores in range.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.pass_threshold) {
            return Err(format!(
                "rubric '{}': passThreshold {} outside [0, 100]",
                self.id, self.pass_threshold
            ));
        }
        if self.criteria.is_empty() {
            return Err(format!("rubric '{}': criteria must be non-empty", self.id));
        }
        for criterion in &self.criteria {
            if criterion.weight < 0.0 {
                return Err(format!(
                    "rubric '{}': criterion '{}' has negative weight",
                    self.id, criterion.id
                ));
            }
            if !(0.0..=100.0).contains(&criterion.min_score) {
                return Err(format!(
                    "rubric '{}': criterion '{}' minScore outside [0, 100]",
                    self.id, criterion.id
                ));
            }
        }
        Ok(())
    }
}

/// One weighted criterion within a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub weight: f64,
    /// Per-criterion pass bar in `[0, 100]`.
    pub min_score: f64,
    /// Required criteria must pass for the rubric to pass, regardless of the
    /// aggregate score.
    #[serde(default)]
    pub required: bool,
    pub evaluation_type: EvaluationType,
    /// Interpreted by the criterion evaluator (predicate string, judge
    /// prompt, ...).
    #[serde(default)]
    pub evaluation_logic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationType {
    Automated,
    Manual,
    LlmBased,
    Hybrid,
}

/// Result of evaluating one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    pub criterion_id: String,
    pub score: f64,
    pub weighted_score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Result of evaluating a whole rubric against a node result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricEvaluation {
    pub rubric_id: String,
    /// Aggregate score in `[0, 100]`.
    pub score: f64,
    pub passed: bool,
    pub criterion_results: Vec<CriterionResult>,
    /// Names of criteria that failed, for backtrack context.
    #[serde(default)]
    pub failed_criteria: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl RubricEvaluation {
    /// Aggregate criterion scores per the scoring contract:
    /// `clamp(Σ score × weight / Σ weight, 0, 100)`, pass iff the score
    /// reaches the threshold and all required criteria passed.
    pub fn aggregate(rubric: &Rubric, results: Vec<CriterionResult>) -> Self {
        let total_weight: f64 = rubric.criteria.iter().map(|c| c.weight).sum();
        let weighted_sum: f64 = results.iter().map(|r| r.weighted_score).sum();
        let score = if total_weight > 0.0 {
            (weighted_sum / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let mut failed_criteria = Vec::new();
        let mut suggestions = Vec::new();
        let mut required_ok = true;
        for (criterion, result) in rubric.criteria.iter().zip(&results) {
            if !result.passed {
                failed_criteria.push(criterion.name.clone());
                if let Some(feedback) = &result.feedback {
                    suggestions.push(feedback.clone());
                }
                if criterion.required {
                    required_ok = false;
                }
            }
        }

        let passed = score >= rubric.pass_threshold && required_ok;
        Self {
            rubric_id: rubric.id.clone(),
            score,
            passed,
            criterion_results: results,
            failed_criteria,
            suggestions,
        }
    }
}
