//! Conditional steps - runtime branch selection

use crate::core::{
    error::ResolutionError,
    property::{resolve_input, StepInput},
    run::Run,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison applied by a [`Condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "eq")]
    Equals,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "gte")]
    GreaterThanOrEqualTo,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "lte")]
    LessThanOrEqualTo,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConditionOperator::Equals => "==",
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::GreaterThanOrEqualTo => ">=",
            ConditionOperator::LessThan => "<",
            ConditionOperator::LessThanOrEqualTo => "<=",
        };
        f.write_str(symbol)
    }
}

impl ConditionOperator {
    /// Apply the operator to two resolved values.
    ///
    /// Numbers compare numerically, strings lexicographically; booleans only
    /// support equality.
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, ResolutionError> {
        let incomparable = || ResolutionError::Incomparable {
            operator: self.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        };

        let ordering = match (left, right) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) if *self == ConditionOperator::Equals => {
                return Ok(a == b)
            }
            _ => None,
        }
        .ok_or_else(incomparable)?;

        Ok(match self {
            ConditionOperator::Equals => ordering == Ordering::Equal,
            ConditionOperator::GreaterThan => ordering == Ordering::Greater,
            ConditionOperator::GreaterThanOrEqualTo => ordering != Ordering::Less,
            ConditionOperator::LessThan => ordering == Ordering::Less,
            ConditionOperator::LessThanOrEqualTo => ordering != Ordering::Greater,
        })
    }
}

/// `left <operator> right`, evaluated once both operands resolve
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub left: StepInput,
    pub right: StepInput,
}

impl Condition {
    pub fn new(
        operator: ConditionOperator,
        left: impl Into<StepInput>,
        right: impl Into<StepInput>,
    ) -> Self {
        Self {
            operator,
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn lte(left: impl Into<StepInput>, right: impl Into<StepInput>) -> Self {
        Self::new(ConditionOperator::LessThanOrEqualTo, left, right)
    }

    pub fn gte(left: impl Into<StepInput>, right: impl Into<StepInput>) -> Self {
        Self::new(ConditionOperator::GreaterThanOrEqualTo, left, right)
    }

    pub fn operands(&self) -> [&StepInput; 2] {
        [&self.left, &self.right]
    }
}

/// Which branch a conditional step selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    If,
    Else,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::If => f.write_str("if"),
            Branch::Else => f.write_str("else"),
        }
    }
}

/// Outcome of evaluating a conditional step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub branch: Branch,
    /// Members of the selected branch
    pub activated: Vec<String>,
    /// Members of the other branch
    pub skipped: Vec<String>,
}

/// AND-combined conditions gating two branches of steps
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalStep {
    pub conditions: Vec<Condition>,
    pub if_steps: Vec<String>,
    pub else_steps: Vec<String>,
}

impl ConditionalStep {
    /// Select a branch for this run.
    ///
    /// Every operand is resolved before anything is compared, so a single
    /// unresolvable operand fails the evaluation even if an earlier
    /// condition would have short-circuited.
    pub fn evaluate(&self, run: &Run) -> Result<Decision, ResolutionError> {
        let resolved = self
            .conditions
            .iter()
            .map(|c| {
                let left = resolve_input(run, &c.left)?;
                let right = resolve_input(run, &c.right)?;
                Ok::<_, ResolutionError>((c.operator, left, right))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut holds = true;
        for (operator, left, right) in &resolved {
            if !operator.apply(left, right)? {
                holds = false;
                break;
            }
        }

        let (branch, activated, skipped) = if holds {
            (Branch::If, &self.if_steps, &self.else_steps)
        } else {
            (Branch::Else, &self.else_steps, &self.if_steps)
        };

        Ok(Decision {
            branch,
            activated: activated.clone(),
            skipped: skipped.clone(),
        })
    }

    /// Every step named in either branch
    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.if_steps.iter().chain(self.else_steps.iter())
    }
}
