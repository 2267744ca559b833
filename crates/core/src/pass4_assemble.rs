//! Pass 4: artifact assembly and validation.
//!
//! Takes the captured value, checks it against the shared artifact schema,
//! enforces the file-name contract on `plan_name`, merges the extractor's
//! local tables into the global ones, runs the structural checks the schema
//! cannot express, and attaches build provenance.

use crate::ast::Span;
use crate::config::CompilerConfig;
use crate::error::Diagnostic;
use crate::pass1_extract::{Extraction, LOCAL_EXPR_FIELD, LOCAL_PRED_FIELD};
use crate::source::SourceFile;
use rankplan_ir::eval::compile_regex;
use rankplan_ir::{
    ArtifactValidator, BuiltBy, ExprNode, PlanArtifact, PredNode, RegexPattern, Registry,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

pub struct AssembleInput<'a> {
    /// The value captured from the sandbox.
    pub value: Value,
    pub extraction: &'a Extraction,
    /// The plan file as authored, before extraction.
    pub plan: &'a SourceFile,
    pub registry: &'a Registry,
    pub config: &'a CompilerConfig,
    pub bundle_digest: String,
}

pub fn assemble(input: AssembleInput) -> Result<PlanArtifact, Vec<Diagnostic>> {
    let plan = input.plan;
    let at_top = |message: String| plan.diagnostic(Span::default(), message);

    // -- Schema --------------------------------------------------------------
    let validator = ArtifactValidator::new().map_err(|e| vec![at_top(e.to_string())])?;
    let schema_errors = validator.errors(&input.value);
    if !schema_errors.is_empty() {
        return Err(schema_errors
            .into_iter()
            .map(|e| at_top(format!("artifact does not conform to schema: {}", e)))
            .collect());
    }
    let mut artifact: PlanArtifact = serde_json::from_value(input.value)
        .map_err(|e| vec![at_top(format!("malformed artifact: {}", e))])?;

    let mut errors = check_plan_name(&artifact.plan_name, plan, input.config);

    // -- Placeholder merge ---------------------------------------------------
    let merged = merge_placeholders(&mut artifact, input.extraction, plan);
    match merged {
        Ok((exprs, preds)) => {
            debug!(merged_exprs = exprs, merged_preds = preds, "placeholders merged");
        }
        Err(mut e) => errors.append(&mut e),
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let structural = check_structure(&artifact, input.registry);
    if !structural.is_empty() {
        return Err(structural.into_iter().map(at_top).collect());
    }

    artifact.built_by = Some(BuiltBy {
        backend: input.config.provenance.backend.clone(),
        tool: input.config.provenance.tool.clone(),
        tool_version: env!("CARGO_PKG_VERSION").to_owned(),
        bundle_digest: input.bundle_digest,
    });
    Ok(artifact)
}

// ──────────────────────────────────────────────
// Plan name
// ──────────────────────────────────────────────

fn is_plan_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Span of the string literal that spells `name`, if the plan file has one.
fn name_literal(plan: &SourceFile, name: &str) -> Span {
    for quote in ['"', '\''] {
        let literal = format!("{}{}{}", quote, name, quote);
        if let Some(start) = plan.text.find(&literal) {
            return Span::new(start, start + literal.len());
        }
    }
    Span::default()
}

fn check_plan_name(declared: &str, plan: &SourceFile, config: &CompilerConfig) -> Vec<Diagnostic> {
    let at = name_literal(plan, declared);
    let mut errors = Vec::new();
    if !is_plan_name(declared) {
        errors.push(
            plan.diagnostic(
                at,
                format!(
                    "plan name '{}' may only contain ASCII letters, digits and underscores",
                    declared
                ),
            )
            .with_hint("rename the plan and its file, e.g. 'home_feed' in home_feed.plan.js"),
        );
    }
    match config.expected_plan_name(&plan.name) {
        None => errors.push(
            plan.diagnostic(
                Span::default(),
                format!(
                    "plan file '{}' does not end with '{}'",
                    plan.name, config.plan_suffix
                ),
            )
            .with_hint(format!("rename the file to '{}{}'", declared, config.plan_suffix)),
        ),
        Some(expected) if expected != declared => errors.push(
            plan.diagnostic(
                at,
                format!(
                    "plan name '{}' does not match file name: expected '{}'",
                    declared, expected
                ),
            )
            .with_hint(format!(
                "rename the plan to '{}' or the file to '{}{}'",
                expected, declared, config.plan_suffix
            )),
        ),
        Some(_) => {}
    }
    errors
}

// ──────────────────────────────────────────────
// Placeholder merge
// ──────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Table {
    Expr,
    Pred,
}

impl Table {
    fn field(self) -> &'static str {
        match self {
            Table::Expr => LOCAL_EXPR_FIELD,
            Table::Pred => LOCAL_PRED_FIELD,
        }
    }

    fn param(self) -> &'static str {
        match self {
            Table::Expr => "expr_id",
            Table::Pred => "pred_id",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Table::Expr => "expression",
            Table::Pred => "predicate",
        }
    }
}

/// `{ __local_expr: k }` or `{ __local_pred: k }`, with `k` any JSON value.
fn as_placeholder(v: &Value) -> Option<(Table, &Value)> {
    let obj = v.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let (k, local) = obj.iter().next()?;
    match k.as_str() {
        LOCAL_EXPR_FIELD => Some((Table::Expr, local)),
        LOCAL_PRED_FIELD => Some((Table::Pred, local)),
        _ => None,
    }
}

/// Mint one fresh global id per local entry: `{prefix}{n}` counting up from
/// the number of existing entries, skipping ids already taken.
fn mint_ids<T>(table: &BTreeMap<String, T>, prefix: char, count: usize) -> Vec<String> {
    let mut next = table.len();
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let id = format!("{}{}", prefix, next);
        next += 1;
        if !table.contains_key(&id) {
            out.push(id);
        }
    }
    out
}

/// Returns the number of merged expressions and predicates.
fn merge_placeholders(
    artifact: &mut PlanArtifact,
    extraction: &Extraction,
    plan: &SourceFile,
) -> Result<(usize, usize), Vec<Diagnostic>> {
    let expr_ids = mint_ids(&artifact.expr_table, 'e', extraction.exprs.len());
    let pred_ids = mint_ids(&artifact.pred_table, 'p', extraction.preds.len());
    let mut expr_used = vec![false; expr_ids.len()];
    let mut pred_used = vec![false; pred_ids.len()];
    let mut errors = Vec::new();
    let top = |message: String| plan.diagnostic(Span::default(), message);

    for node in &mut artifact.nodes {
        for (param, value) in node.params.iter_mut() {
            let Some((table, local)) = as_placeholder(value) else {
                continue;
            };
            if param != table.param() {
                errors.push(top(format!(
                    "node '{}': {} placeholder in param '{}', expected '{}'",
                    node.node_id,
                    table.noun(),
                    param,
                    table.param()
                )));
                continue;
            }
            let (ids, used) = match table {
                Table::Expr => (&expr_ids, &mut expr_used),
                Table::Pred => (&pred_ids, &mut pred_used),
            };
            let Some(k) = local.as_u64().map(|k| k as usize).filter(|k| *k < ids.len()) else {
                errors.push(top(format!(
                    "node '{}': unknown {} placeholder {}",
                    node.node_id,
                    table.noun(),
                    local
                )));
                continue;
            };
            used[k] = true;
            *value = Value::String(ids[k].clone());
        }
    }

    // Anything left is a placeholder the library did not store as a param.
    if errors.is_empty() {
        let doc = serde_json::to_value(&*artifact).unwrap_or(Value::Null);
        let mut leftovers = Vec::new();
        find_placeholders(&doc, &mut String::from("$"), &mut leftovers);
        for path in leftovers {
            errors.push(top(format!("unresolved placeholder at {}", path)));
        }
    }

    for (k, used) in expr_used.iter().enumerate() {
        if !used {
            errors.push(orphan(plan, Table::Expr, extraction.exprs[k].1));
        }
    }
    for (k, used) in pred_used.iter().enumerate() {
        if !used {
            errors.push(orphan(plan, Table::Pred, extraction.preds[k].1));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    for (id, (node, _)) in expr_ids.iter().zip(&extraction.exprs) {
        artifact.expr_table.insert(id.clone(), node.clone());
    }
    for (id, (node, _)) in pred_ids.iter().zip(&extraction.preds) {
        artifact.pred_table.insert(id.clone(), node.clone());
    }
    Ok((expr_ids.len(), pred_ids.len()))
}

fn orphan(plan: &SourceFile, table: Table, span: Span) -> Diagnostic {
    plan.diagnostic(
        span,
        format!(
            "extracted {} is not used by any plan node",
            table.noun()
        ),
    )
    .with_hint(format!(
        "natural syntax is only meaningful in the '{}' option of a plan builder call",
        match table {
            Table::Expr => "expr",
            Table::Pred => "pred",
        }
    ))
}

fn find_placeholders(v: &Value, path: &mut String, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            if map.contains_key(LOCAL_EXPR_FIELD) || map.contains_key(LOCAL_PRED_FIELD) {
                out.push(path.clone());
                return;
            }
            for (k, child) in map {
                let len = path.len();
                path.push('.');
                path.push_str(k);
                find_placeholders(child, path, out);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{}]", i));
                find_placeholders(child, path, out);
                path.truncate(len);
            }
        }
        _ => {}
    }
}

// ──────────────────────────────────────────────
// Structural checks
// ──────────────────────────────────────────────

fn is_key_param(name: &str) -> bool {
    name.ends_with("_key") || name.ends_with("_key_id")
}

fn is_param_param(name: &str) -> bool {
    name == "param_id" || name.ends_with("_param_id")
}

fn check_refs(
    what: &str,
    registry: &Registry,
    visit: impl FnOnce(&mut dyn FnMut(u32), &mut dyn FnMut(u32)),
    errors: &mut Vec<String>,
) {
    let mut bad_keys = Vec::new();
    let mut bad_params = Vec::new();
    visit(
        &mut |k| {
            if !registry.has_key_id(k) {
                bad_keys.push(k);
            }
        },
        &mut |p| {
            if !registry.has_param_id(p) {
                bad_params.push(p);
            }
        },
    );
    for k in bad_keys {
        errors.push(format!("{} refers to unknown key id {}", what, k));
    }
    for p in bad_params {
        errors.push(format!("{} refers to unknown param id {}", what, p));
    }
}

fn for_each_regex<'p>(pred: &'p PredNode, f: &mut dyn FnMut(&'p PredNode)) {
    match pred {
        PredNode::And { a, b } | PredNode::Or { a, b } => {
            for_each_regex(a, f);
            for_each_regex(b, f);
        }
        PredNode::Not { x } => for_each_regex(x, f),
        PredNode::Regex { .. } => f(pred),
        PredNode::ConstBool { .. }
        | PredNode::Cmp { .. }
        | PredNode::IsNull { .. }
        | PredNode::NotNull { .. } => {}
    }
}

/// Rules the schema cannot express. Returns one message per violation.
pub fn check_structure(artifact: &PlanArtifact, registry: &Registry) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for node in &artifact.nodes {
        let id = node.node_id.as_str();
        for input in &node.inputs {
            if !seen.contains(input.as_str()) {
                errors.push(format!(
                    "node '{}' input '{}' does not refer to an earlier node",
                    id, input
                ));
            }
        }
        if !seen.insert(id) {
            errors.push(format!("duplicate node id '{}'", id));
        }

        for (param, value) in &node.params {
            let table_ref = match param.as_str() {
                "expr_id" => Some(("expression", artifact.expr_table.contains_key(value.as_str().unwrap_or("")))),
                "pred_id" => Some(("predicate", artifact.pred_table.contains_key(value.as_str().unwrap_or("")))),
                _ => None,
            };
            if let Some((noun, found)) = table_ref {
                if !found {
                    errors.push(format!(
                        "node '{}' references unknown {} {}",
                        id, noun, value
                    ));
                }
                continue;
            }
            let registered = if is_key_param(param) {
                Some(("key", value.as_u64().and_then(|v| u32::try_from(v).ok()).map(|v| registry.has_key_id(v))))
            } else if is_param_param(param) {
                Some(("param", value.as_u64().and_then(|v| u32::try_from(v).ok()).map(|v| registry.has_param_id(v))))
            } else {
                None
            };
            match registered {
                Some((kind, None)) => errors.push(format!(
                    "node '{}' param '{}' must be a {} id, got {}",
                    id, param, kind, value
                )),
                Some((kind, Some(false))) => errors.push(format!(
                    "node '{}' param '{}' refers to unknown {} id {}",
                    id, param, kind, value
                )),
                _ => {}
            }
        }
    }

    for output in &artifact.outputs {
        if !seen.contains(output.as_str()) {
            errors.push(format!("output '{}' does not refer to a node", output));
        }
    }

    for (id, expr) in &artifact.expr_table {
        check_refs(
            &format!("expression '{}'", id),
            registry,
            |k, p| ExprNode::for_each_ref(expr, k, p),
            &mut errors,
        );
    }
    for (id, pred) in &artifact.pred_table {
        check_refs(
            &format!("predicate '{}'", id),
            registry,
            |k, p| PredNode::for_each_ref(pred, k, p),
            &mut errors,
        );
        for_each_regex(pred, &mut |node| {
            if let PredNode::Regex {
                pattern: RegexPattern::Literal { value },
                flags,
                ..
            } = node
            {
                if let Err(e) = compile_regex(value, *flags) {
                    errors.push(format!("predicate '{}': {}", id, e));
                }
            }
        });
    }
    errors
}
