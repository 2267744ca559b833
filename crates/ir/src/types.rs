//! Typed structs for the plan artifact and its expression/predicate IR.
//!
//! The JSON shape of every type here is the interchange contract with the
//! execution engine; field names and tags must not drift without a schema
//! version bump.

use crate::error::IrError;
use crate::schema::ArtifactValidator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ──────────────────────────────────────────────
// Expression IR
// ──────────────────────────────────────────────

/// A numeric expression over row keys and request parameters.
///
/// Trees are finite and acyclic by construction: they are only ever built
/// by structural recursion over a finite syntax tree or by deserializing a
/// finite JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExprNode {
    ConstNumber { value: f64 },
    ConstNull,
    Neg { x: Box<ExprNode> },
    Add { a: Box<ExprNode>, b: Box<ExprNode> },
    Sub { a: Box<ExprNode>, b: Box<ExprNode> },
    Mul { a: Box<ExprNode>, b: Box<ExprNode> },
    KeyRef { key_id: u32 },
    ParamRef { param_id: u32 },
    Coalesce { a: Box<ExprNode>, b: Box<ExprNode> },
}

impl ExprNode {
    pub fn number(value: f64) -> Self {
        ExprNode::ConstNumber { value }
    }

    pub fn key(key_id: u32) -> Self {
        ExprNode::KeyRef { key_id }
    }

    pub fn param(param_id: u32) -> Self {
        ExprNode::ParamRef { param_id }
    }

    pub fn neg(x: ExprNode) -> Self {
        ExprNode::Neg { x: Box::new(x) }
    }

    pub fn add(a: ExprNode, b: ExprNode) -> Self {
        ExprNode::Add {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn sub(a: ExprNode, b: ExprNode) -> Self {
        ExprNode::Sub {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn mul(a: ExprNode, b: ExprNode) -> Self {
        ExprNode::Mul {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn coalesce(a: ExprNode, b: ExprNode) -> Self {
        ExprNode::Coalesce {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    /// The IR op tag, as written in JSON.
    pub fn op_name(&self) -> &'static str {
        match self {
            ExprNode::ConstNumber { .. } => "const_number",
            ExprNode::ConstNull => "const_null",
            ExprNode::Neg { .. } => "neg",
            ExprNode::Add { .. } => "add",
            ExprNode::Sub { .. } => "sub",
            ExprNode::Mul { .. } => "mul",
            ExprNode::KeyRef { .. } => "key_ref",
            ExprNode::ParamRef { .. } => "param_ref",
            ExprNode::Coalesce { .. } => "coalesce",
        }
    }

    /// Visit every key id and param id referenced by this tree.
    pub fn for_each_ref(&self, on_key: &mut dyn FnMut(u32), on_param: &mut dyn FnMut(u32)) {
        match self {
            ExprNode::ConstNumber { .. } | ExprNode::ConstNull => {}
            ExprNode::KeyRef { key_id } => on_key(*key_id),
            ExprNode::ParamRef { param_id } => on_param(*param_id),
            ExprNode::Neg { x } => x.for_each_ref(on_key, on_param),
            ExprNode::Add { a, b }
            | ExprNode::Sub { a, b }
            | ExprNode::Mul { a, b }
            | ExprNode::Coalesce { a, b } => {
                a.for_each_ref(on_key, on_param);
                b.for_each_ref(on_key, on_param);
            }
        }
    }
}

// ──────────────────────────────────────────────
// Predicate IR
// ──────────────────────────────────────────────

/// Normalized comparison operator. Both `==` and `===` in source map to
/// [`CmpOp::Eq`]; both `!=` and `!==` map to [`CmpOp::Ne`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Source of a regex pattern: an inline literal or a request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegexPattern {
    Literal { value: String },
    Param { param_id: u32 },
}

/// Regex flags. Only case-insensitivity is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegexFlags {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "i")]
    CaseInsensitive,
}

impl RegexFlags {
    /// Parse a flags string as written in source; only `""` and `"i"` are valid.
    pub fn parse(flags: &str) -> Option<Self> {
        match flags {
            "" => Some(RegexFlags::None),
            "i" => Some(RegexFlags::CaseInsensitive),
            _ => None,
        }
    }
}

/// A boolean predicate over row keys and request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredNode {
    ConstBool {
        value: bool,
    },
    And {
        a: Box<PredNode>,
        b: Box<PredNode>,
    },
    Or {
        a: Box<PredNode>,
        b: Box<PredNode>,
    },
    Not {
        x: Box<PredNode>,
    },
    Cmp {
        cmp: CmpOp,
        a: ExprNode,
        b: ExprNode,
    },
    IsNull {
        x: ExprNode,
    },
    NotNull {
        x: ExprNode,
    },
    Regex {
        key_id: u32,
        pattern: RegexPattern,
        #[serde(default)]
        flags: RegexFlags,
    },
}

impl PredNode {
    pub fn and(a: PredNode, b: PredNode) -> Self {
        PredNode::And {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn or(a: PredNode, b: PredNode) -> Self {
        PredNode::Or {
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn not(x: PredNode) -> Self {
        PredNode::Not { x: Box::new(x) }
    }

    pub fn cmp(cmp: CmpOp, a: ExprNode, b: ExprNode) -> Self {
        PredNode::Cmp { cmp, a, b }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            PredNode::ConstBool { .. } => "const_bool",
            PredNode::And { .. } => "and",
            PredNode::Or { .. } => "or",
            PredNode::Not { .. } => "not",
            PredNode::Cmp { .. } => "cmp",
            PredNode::IsNull { .. } => "is_null",
            PredNode::NotNull { .. } => "not_null",
            PredNode::Regex { .. } => "regex",
        }
    }

    /// Visit every key id and param id referenced by this tree, including
    /// those inside comparison operands and regex patterns.
    pub fn for_each_ref(&self, on_key: &mut dyn FnMut(u32), on_param: &mut dyn FnMut(u32)) {
        match self {
            PredNode::ConstBool { .. } => {}
            PredNode::And { a, b } | PredNode::Or { a, b } => {
                a.for_each_ref(on_key, on_param);
                b.for_each_ref(on_key, on_param);
            }
            PredNode::Not { x } => x.for_each_ref(on_key, on_param),
            PredNode::Cmp { a, b, .. } => {
                a.for_each_ref(on_key, on_param);
                b.for_each_ref(on_key, on_param);
            }
            PredNode::IsNull { x } | PredNode::NotNull { x } => x.for_each_ref(on_key, on_param),
            PredNode::Regex {
                key_id, pattern, ..
            } => {
                on_key(*key_id);
                if let RegexPattern::Param { param_id } = pattern {
                    on_param(*param_id);
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Artifact
// ──────────────────────────────────────────────

/// Build provenance attached by the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltBy {
    pub backend: String,
    pub tool: String,
    pub tool_version: String,
    pub bundle_digest: String,
}

/// One DAG node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// Node-scoped capability payloads; every key must appear in the
    /// artifact's `capabilities_required`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

/// The compiled plan artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub schema_version: u32,
    pub plan_name: String,
    pub nodes: Vec<PlanNode>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub expr_table: BTreeMap<String, ExprNode>,
    #[serde(default)]
    pub pred_table: BTreeMap<String, PredNode>,
    /// Sorted ascending, no duplicates. Never re-sorted on load.
    #[serde(default)]
    pub capabilities_required: Vec<String>,
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_by: Option<BuiltBy>,
}

impl PlanArtifact {
    /// Validate `doc` against the shared artifact schema, then deserialize.
    pub fn from_json(doc: &Value) -> Result<Self, IrError> {
        let validator = ArtifactValidator::new()?;
        validator.validate(doc)?;
        Ok(serde_json::from_value(doc.clone())?)
    }

    pub fn to_json_value(&self) -> Result<Value, IrError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Canonical bytes: sorted keys, no whitespace.
    pub fn to_canonical_json(&self) -> Result<String, IrError> {
        Ok(crate::canonical::to_canonical_string(&self.to_json_value()?))
    }

    pub fn node(&self, node_id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}
