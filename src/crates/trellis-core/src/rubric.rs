//! Rubric engine
//!
//! Holds registered rubrics, lazily loads them from workflow-declared sources,
//! and evaluates node results against them. Criterion scoring is delegated to
//! a [`CriterionEvaluator`]; the default heuristic evaluator understands a
//! small predicate language in `evaluationLogic`:
//!
//! ```text
//! nonempty            output is non-blank
//! json                output parses as JSON
//! contains:<needle>   output contains the needle
//! min_length:<n>      output is at least n characters
//! max_length:<n>      output is at most n characters
//! ```
//!
//! Unknown or empty logic scores full marks for `Automated` criteria and a
//! neutral pass for `Manual`/`LlmBased` ones, so a rubric without wired
//! evaluators degrades to threshold-only gating rather than failing closed.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::rubric::{Criterion, CriterionResult, Rubric, RubricEvaluation};
use crate::state::{Context, NodeResult};

/// Scores a single criterion against a node result.
#[async_trait]
pub trait CriterionEvaluator: Send + Sync {
    async fn score(
        &self,
        criterion: &Criterion,
        result: &NodeResult,
        context: &Context,
    ) -> Result<(f64, Option<String>)>;
}

/// Default evaluator interpreting the predicate forms documented on the
/// module.
pub struct HeuristicEvaluator;

#[async_trait]
impl CriterionEvaluator for HeuristicEvaluator {
    async fn score(
        &self,
        criterion: &Criterion,
        result: &NodeResult,
        _context: &Context,
    ) -> Result<(f64, Option<String>)> {
        let output = result.output_text().unwrap_or_default();
        let logic = criterion.evaluation_logic.trim();

        if logic.is_empty() {
            return Ok((100.0, None));
        }

        let (pass, feedback) = match logic.split_once(':') {
            Some(("contains", needle)) => (
                output.contains(needle),
                format!("output should contain '{needle}'"),
            ),
            Some(("min_length", n)) => {
                let n: usize = n.trim().parse().unwrap_or(0);
                (
                    output.chars().count() >= n,
                    format!("output should be at least {n} characters"),
                )
            }
            Some(("max_length", n)) => {
                let n: usize = n.trim().parse().unwrap_or(usize::MAX);
                (
                    output.chars().count() <= n,
                    format!("output should be at most {n} characters"),
                )
            }
            None if logic == "nonempty" => {
                (!output.trim().is_empty(), "output should be non-empty".to_string())
            }
            None if logic == "json" => (
                serde_json::from_str::<serde_json::Value>(&output).is_ok(),
                "output should be valid JSON".to_string(),
            ),
            _ => return Ok((100.0, None)),
        };

        if pass {
            Ok((100.0, None))
        } else {
            Ok((0.0, Some(feedback)))
        }
    }
}

/// Parses rubric source locators declared in `workflow.rubrics`.
///
/// The default loader accepts inline JSON; deployments can substitute a
/// loader resolving paths or remote locators.
pub trait RubricLoader: Send + Sync {
    fn load(&self, rubric_id: &str, source: &str) -> Result<Rubric>;
}

/// Loader for inline-JSON rubric sources.
pub struct InlineJsonLoader;

impl RubricLoader for InlineJsonLoader {
    fn load(&self, rubric_id: &str, source: &str) -> Result<Rubric> {
        let rubric: Rubric = serde_json::from_str(source)
            .map_err(|e| EngineError::Rubric(format!("rubric '{rubric_id}' source: {e}")))?;
        rubric.validate().map_err(EngineError::Rubric)?;
        Ok(rubric)
    }
}

/// Registry plus evaluation entry point.
pub struct RubricEngine {
    rubrics: RwLock<HashMap<String, Arc<Rubric>>>,
    evaluator: Arc<dyn CriterionEvaluator>,
    loader: Arc<dyn RubricLoader>,
}

impl Default for RubricEngine {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicEvaluator), Arc::new(InlineJsonLoader))
    }
}

impl RubricEngine {
    pub fn new(evaluator: Arc<dyn CriterionEvaluator>, loader: Arc<dyn RubricLoader>) -> Self {
        Self {
            rubrics: RwLock::new(HashMap::new()),
            evaluator,
            loader,
        }
    }

    pub fn register(&self, rubric: Rubric) -> Result<()> {
        rubric.validate().map_err(EngineError::Rubric)?;
        self.rubrics.write().insert(rubric.id.clone(), Arc::new(rubric));
        Ok(())
    }

    pub fn contains(&self, rubric_id: &str) -> bool {
        self.rubrics.read().contains_key(rubric_id)
    }

    /// Load `rubric_id` from `source` unless already registered.
    pub fn ensure_loaded(&self, rubric_id: &str, source: &str) -> Result<()> {
        if self.contains(rubric_id) {
            return Ok(());
        }
        let rubric = self.loader.load(rubric_id, source)?;
        debug!(rubric = rubric_id, "lazily registered rubric");
        self.rubrics.write().insert(rubric_id.to_string(), Arc::new(rubric));
        Ok(())
    }

    /// Evaluate a node result against a registered rubric.
    pub async fn evaluate(
        &self,
        rubric_id: &str,
        result: &NodeResult,
        context: &Context,
    ) -> Result<RubricEvaluation> {
        let rubric = self
            .rubrics
            .read()
            .get(rubric_id)
            .cloned()
            .ok_or_else(|| EngineError::RubricMissing(rubric_id.to_string()))?;

        let mut results = Vec::with_capacity(rubric.criteria.len());
        for criterion in &rubric.criteria {
            let (score, feedback) = self.evaluator.score(criterion, result, context).await?;
            let score = score.clamp(0.0, 100.0);
            results.push(CriterionResult {
                criterion_id: criterion.id.clone(),
                score,
                weighted_score: score * criterion.weight,
                passed: score >= criterion.min_score,
                feedback,
            });
        }

        Ok(RubricEvaluation::aggregate(&rubric, results))
    }
}
