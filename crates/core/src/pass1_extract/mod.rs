//! Pass 1: AST extraction.
//!
//! Visits every call in the plan module. For each object-literal argument,
//! the value of an `expr` or `pred` field is either builder-style (an
//! `E.*`/`Pr.*` call or an object with an `op` tag, passed through) or
//! natural syntax, which is compiled here to IR and replaced in the source
//! text by a `{ __local_expr: k }` / `{ __local_pred: k }` placeholder.
//!
//! Every call site is visited before any text is edited. If any natural
//! value fails to compile the whole set of diagnostics is returned and the
//! source is left untouched.

mod expr;
mod pred;

pub use expr::compile_expr;
pub use pred::compile_pred;

use crate::ast::{self, Expr, ExprKind, Module, Property, Span};
use crate::error::Diagnostic;
use crate::source::SourceFile;
use rankplan_ir::{ExprNode, PredNode, Registry};
use std::collections::HashSet;

/// Placeholder field names shared with the plan-builder library and the
/// assembler.
pub const LOCAL_EXPR_FIELD: &str = "__local_expr";
pub const LOCAL_PRED_FIELD: &str = "__local_pred";

/// Immutable lookups threaded through the expression and predicate
/// compilers.
pub struct CompileCtx<'a> {
    pub registry: &'a Registry,
    pub source: &'a SourceFile,
}

impl<'a> CompileCtx<'a> {
    pub fn diag(&self, at: &Expr, message: impl Into<String>) -> Diagnostic {
        self.source.diagnostic(at.span, message)
    }
}

/// Result of a successful extraction. Local ids are indexes into `exprs`
/// and `preds`; spans point into the original, unrewritten text.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub source: String,
    pub exprs: Vec<(ExprNode, Span)>,
    pub preds: Vec<(PredNode, Span)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Expr,
    Pred,
}

fn has_op_tag(props: &[Property]) -> bool {
    props.iter().any(|p| match p {
        Property::KeyValue { key, .. } => key == "op",
        Property::Shorthand { name, .. } => name == "op",
        Property::Spread(_) => false,
    })
}

fn is_builder_style(value: &Expr, field: Field) -> bool {
    let ns = match field {
        Field::Expr => "E",
        Field::Pred => "Pr",
    };
    match &value.unparen().kind {
        ExprKind::Call { callee, .. } => {
            matches!(callee.as_namespace_member(), Some((n, _)) if n == ns)
        }
        ExprKind::Object(props) => has_op_tag(props),
        _ => false,
    }
}

/// Natural `expr`/`pred` values of one call, in argument order.
fn natural_fields(args: &[Expr]) -> Vec<(Field, &Expr)> {
    let mut out = Vec::new();
    for arg in args {
        let ExprKind::Object(props) = &arg.unparen().kind else {
            continue;
        };
        for prop in props {
            let Property::KeyValue { key, value, .. } = prop else {
                continue;
            };
            let field = match key.as_str() {
                "expr" => Field::Expr,
                "pred" => Field::Pred,
                _ => continue,
            };
            if !is_builder_style(value, field) {
                out.push((field, value));
            }
        }
    }
    out
}

pub fn extract(module: &Module, ctx: &CompileCtx) -> Result<Extraction, Vec<Diagnostic>> {
    let mut exprs: Vec<(ExprNode, Span)> = Vec::new();
    let mut preds: Vec<(PredNode, Span)> = Vec::new();
    let mut edits: Vec<(Span, String)> = Vec::new();
    let mut errors: Vec<Diagnostic> = Vec::new();
    // Natural values are compiled whole; the walk does not descend into them.
    let mut natural: HashSet<(usize, usize)> = HashSet::new();

    ast::walk_module(module, &mut |e: &Expr| {
        if natural.contains(&(e.span.start, e.span.end)) {
            return false;
        }
        let ExprKind::Call { args, .. } = &e.kind else {
            return true;
        };
        for (field, value) in natural_fields(args) {
            natural.insert((value.span.start, value.span.end));
            match field {
                Field::Expr => match compile_expr(value, ctx) {
                    Ok(node) => {
                        let k = exprs.len();
                        exprs.push((node, value.span));
                        edits.push((value.span, format!("{{ {}: {} }}", LOCAL_EXPR_FIELD, k)));
                    }
                    Err(d) => errors.push(d),
                },
                Field::Pred => match compile_pred(value, ctx) {
                    Ok(node) => {
                        let k = preds.len();
                        preds.push((node, value.span));
                        edits.push((value.span, format!("{{ {}: {} }}", LOCAL_PRED_FIELD, k)));
                    }
                    Err(d) => errors.push(d),
                },
            }
        }
        true
    });

    if !errors.is_empty() {
        // The walk meets outer calls of a chain first; report in source order.
        errors.sort_by_key(|d| (d.line, d.column));
        return Err(errors);
    }
    Ok(Extraction {
        source: apply_edits(&ctx.source.text, edits),
        exprs,
        preds,
    })
}

/// Splice replacements into `text`, last span first, so that pending spans
/// stay valid. Spans must not overlap.
pub fn apply_edits(text: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = text.to_owned();
    for (span, replacement) in edits {
        out.replace_range(span.start..span.end, &replacement);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ast::{Item, StmtKind};
    use crate::parser;
    use rankplan_ir::{CmpOp, RegistryEntry};

    pub(crate) fn test_registry() -> Registry {
        let e = |name: &str, id: u32| RegistryEntry {
            name: name.to_owned(),
            id,
        };
        Registry::new(
            vec![
                e("final_score", 1),
                e("model_score_1", 2),
                e("model_score_2", 3),
                e("country", 4),
            ],
            vec![
                e("weight", 1),
                e("stage", 2),
                e("flag", 3),
                e("pattern", 4),
                e("threshold", 5),
            ],
        )
        .unwrap()
    }

    pub(crate) fn ctx_for(text: &str) -> (SourceFile, Module, Registry) {
        let src = SourceFile::new("t.plan.js", text);
        let module = parser::parse(&src).unwrap();
        (src, module, test_registry())
    }

    /// Initializer of the first declaration in the module.
    pub(crate) fn first_init(module: &Module) -> &Expr {
        for item in &module.items {
            if let Item::Stmt(stmt) | Item::Export(stmt) = item {
                if let StmtKind::Decl { decls, .. } = &stmt.kind {
                    if let Some((_, Some(init))) = decls.first() {
                        return init;
                    }
                }
            }
        }
        panic!("no declaration with an initializer");
    }

    fn run(text: &str) -> Result<Extraction, Vec<Diagnostic>> {
        let (src, module, registry) = ctx_for(text);
        let ctx = CompileCtx {
            registry: &registry,
            source: &src,
        };
        extract(&module, &ctx)
    }

    #[test]
    fn natural_vm_expression_is_replaced() {
        let text = "c.vm({ outKey: Key.final_score, expr: Key.model_score_1 + Key.model_score_2 * P.weight });";
        let out = run(text).unwrap();
        assert_eq!(out.exprs.len(), 1);
        assert_eq!(
            out.exprs[0].0,
            ExprNode::add(
                ExprNode::key(2),
                ExprNode::mul(ExprNode::key(3), ExprNode::param(1)),
            )
        );
        assert_eq!(
            out.source,
            "c.vm({ outKey: Key.final_score, expr: { __local_expr: 0 } });"
        );
    }

    #[test]
    fn builder_style_values_pass_through() {
        let text = "a.vm({ expr: E.add(E.key(Key.final_score), E.num(1)) });\n\
                    b.filter({ pred: { op: \"const_bool\", value: true } });\n\
                    c.filter({ pred: Pr.not(Pr.bool(false)) });";
        let out = run(text).unwrap();
        assert!(out.exprs.is_empty());
        assert!(out.preds.is_empty());
        assert_eq!(out.source, text);
    }

    #[test]
    fn ids_follow_visit_order_per_table() {
        let text = "h.filter({ pred: Key.final_score > 1 })\n\
                    .vm({ outKey: Key.final_score, expr: Key.final_score * 2 })\n\
                    .filter({ pred: Key.model_score_1 == null });";
        let out = run(text).unwrap();
        assert_eq!(out.exprs.len(), 1);
        assert_eq!(out.preds.len(), 2);
        // The outermost call (the last filter) is visited first.
        assert_eq!(
            out.preds[0].0,
            PredNode::IsNull {
                x: ExprNode::key(2)
            }
        );
        assert_eq!(
            out.preds[1].0,
            PredNode::cmp(CmpOp::Gt, ExprNode::key(1), ExprNode::number(1.0))
        );
        assert!(out.source.contains("pred: { __local_pred: 1 }"));
        assert!(out.source.contains("pred: { __local_pred: 0 }"));
        assert!(out.source.contains("expr: { __local_expr: 0 }"));
    }

    #[test]
    fn failures_accumulate_without_partial_rewrite() {
        let text = "a.vm({ expr: Key.final_score / 2 });\n\
                    b.vm({ expr: Key.final_score + 1 });\n\
                    c.vm({ expr: coalesce(1, 2, 3) });";
        let errs = run(text).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].message, "division is not supported");
        assert_eq!(errs[0].line, 1);
        assert_eq!(errs[1].message, "coalesce() takes exactly 2 arguments, got 3");
        assert_eq!(errs[1].line, 3);
    }

    #[test]
    fn other_fields_and_non_object_args_are_ignored() {
        let text = "f({ expression: Key.final_score / 2 }, Key.x);\nconst expr = 1 / 2;";
        let out = run(text).unwrap();
        assert!(out.exprs.is_empty());
        assert_eq!(out.source, text);
    }

    #[test]
    fn edits_apply_last_span_first() {
        let text = "0123456789";
        let edits = vec![
            (Span::new(1, 3), "AAAA".to_owned()),
            (Span::new(6, 9), "B".to_owned()),
            (Span::new(4, 5), "".to_owned()),
        ];
        assert_eq!(apply_edits(text, edits), "0AAAA35B9");
    }

    #[test]
    fn multibyte_text_before_a_span_is_preserved() {
        let text = "// é ü\nx.vm({ expr: Key.final_score - 1 });";
        let out = run(text).unwrap();
        assert_eq!(out.source, "// é ü\nx.vm({ expr: { __local_expr: 0 } });");
        assert_eq!(out.exprs[0].1.start, text.find("Key.final_score").unwrap());
    }
}
