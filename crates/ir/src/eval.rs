//! Reference evaluator for the expression and predicate IR over one row.
//!
//! Null semantics: arithmetic propagates null, `coalesce` yields its first
//! non-null operand, and every comparison with a null side is false.

use crate::types::{CmpOp, ExprNode, PredNode, RegexFlags, RegexPattern};
use std::collections::HashMap;

/// A cell value. Numeric expressions only read [`Scalar::Number`]; regex
/// predicates only read [`Scalar::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

/// One row of key values plus the request parameters it is evaluated under.
/// Absent entries read as null.
#[derive(Debug, Clone, Default)]
pub struct Row {
    keys: HashMap<u32, Scalar>,
    params: HashMap<u32, Scalar>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn with_key(mut self, key_id: u32, value: Scalar) -> Self {
        self.keys.insert(key_id, value);
        self
    }

    pub fn with_param(mut self, param_id: u32, value: Scalar) -> Self {
        self.params.insert(param_id, value);
        self
    }

    fn key_number(&self, id: u32) -> Option<f64> {
        match self.keys.get(&id) {
            Some(Scalar::Number(n)) => Some(*n),
            _ => None,
        }
    }

    fn param_number(&self, id: u32) -> Option<f64> {
        match self.params.get(&id) {
            Some(Scalar::Number(n)) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EvalError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Evaluate an expression; `None` is null.
pub fn eval_expr(node: &ExprNode, row: &Row) -> Option<f64> {
    match node {
        ExprNode::ConstNumber { value } => Some(*value),
        ExprNode::ConstNull => None,
        ExprNode::KeyRef { key_id } => row.key_number(*key_id),
        ExprNode::ParamRef { param_id } => row.param_number(*param_id),
        ExprNode::Neg { x } => eval_expr(x, row).map(|v| -v),
        ExprNode::Add { a, b } => Some(eval_expr(a, row)? + eval_expr(b, row)?),
        ExprNode::Sub { a, b } => Some(eval_expr(a, row)? - eval_expr(b, row)?),
        ExprNode::Mul { a, b } => Some(eval_expr(a, row)? * eval_expr(b, row)?),
        ExprNode::Coalesce { a, b } => eval_expr(a, row).or_else(|| eval_expr(b, row)),
    }
}

pub fn eval_pred(node: &PredNode, row: &Row) -> Result<bool, EvalError> {
    Ok(match node {
        PredNode::ConstBool { value } => *value,
        PredNode::And { a, b } => eval_pred(a, row)? && eval_pred(b, row)?,
        PredNode::Or { a, b } => eval_pred(a, row)? || eval_pred(b, row)?,
        PredNode::Not { x } => !eval_pred(x, row)?,
        PredNode::IsNull { x } => eval_expr(x, row).is_none(),
        PredNode::NotNull { x } => eval_expr(x, row).is_some(),
        PredNode::Cmp { cmp, a, b } => match (eval_expr(a, row), eval_expr(b, row)) {
            (Some(a), Some(b)) => compare(*cmp, a, b),
            _ => false,
        },
        PredNode::Regex {
            key_id,
            pattern,
            flags,
        } => {
            let text = match row.keys.get(key_id) {
                Some(Scalar::Text(s)) => s,
                _ => return Ok(false),
            };
            let pattern = match pattern {
                RegexPattern::Literal { value } => value.as_str(),
                RegexPattern::Param { param_id } => match row.params.get(param_id) {
                    Some(Scalar::Text(s)) => s.as_str(),
                    _ => return Ok(false),
                },
            };
            compile_regex(pattern, *flags)?.is_match(text)
        }
    })
}

fn compare(cmp: CmpOp, a: f64, b: f64) -> bool {
    match cmp {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

/// Compile a pattern with the given flags. Also used at build time to
/// reject literal patterns that would fail on the engine.
pub fn compile_regex(pattern: &str, flags: RegexFlags) -> Result<regex::Regex, EvalError> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(flags == RegexFlags::CaseInsensitive)
        .build()
        .map_err(|e| EvalError::InvalidRegex {
            pattern: pattern.to_owned(),
            message: e.to_string(),
        })
}
