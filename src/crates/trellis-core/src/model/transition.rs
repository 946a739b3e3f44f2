//! Transition rules
//!
//! Rules are an ordered sum type evaluated by the transition processor; the
//! first rule to produce a target wins. Retry bookkeeping for `Failure` rules
//! lives on execution state keyed by node id, never inside the rule itself,
//! so the same workflow object can safely run many executions at once.

use serde::{Deserialize, Serialize};

use crate::model::NodeId;

/// Ordered transition rule attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransitionRule {
    /// Unconditional transition.
    Always { target: NodeId },

    /// Matches iff the node result status is Success.
    Success { target: NodeId },

    /// Matches on Failure while the node's retry counter has not exceeded
    /// `max_retries`.
    Failure { max_retries: u32, target: NodeId },

    /// Score-based routing; the first matching condition wins.
    Score { conditions: Vec<ScoreCondition> },
}

/// Comparison operator for a [`ScoreCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    /// Inclusive range `value..=upper`.
    Range,
}

/// A single score comparison with its routing target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCondition {
    pub operator: ScoreOperator,
    pub value: f64,
    /// Upper bound, only meaningful for [`ScoreOperator::Range`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    pub target: NodeId,
}

impl ScoreCondition {
    /// Whether `score` satisfies this condition.
    pub fn matches(&self, score: f64) -> bool {
        match self.operator {
            ScoreOperator::Gt => score > self.value,
            ScoreOperator::Gte => score >= self.value,
            ScoreOperator::Lt => score < self.value,
            ScoreOperator::Lte => score <= self.value,
            ScoreOperator::Eq => (score - self.value).abs() < f64::EPSILON,
            ScoreOperator::Range => {
                let upper = self.upper.unwrap_or(self.value);
                score >= self.value && score <= upper
            }
        }
    }
}

impl TransitionRule {
    /// Targets referenced by this rule, for structural validation.
    pub fn targets(&self) -> Vec<&NodeId> {
        match self {
            TransitionRule::Always { target }
            | TransitionRule::Success { target }
            | TransitionRule::Failure { target, .. } => vec![target],
            TransitionRule::Score { conditions } => {
                conditions.iter().map(|c| &c.target).collect()
            }
        }
    }

    /// First target a matching score condition routes to, if this is a
    /// `Score` rule and any condition matches.
    pub fn matching_score_target(&self, score: f64) -> Option<&NodeId> {
        match self {
            TransitionRule::Score { conditions } => conditions
                .iter()
                .find(|c| c.matches(score))
                .map(|c| &c.target),
            _ => None,
        }
    }
}
