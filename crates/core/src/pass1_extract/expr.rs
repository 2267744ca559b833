//! Expression Compiler: one syntax subtree to an [`ExprNode`].

use super::CompileCtx;
use crate::ast::{parse_number, BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::Diagnostic;
use rankplan_ir::ExprNode;

/// Namespace identifiers for registry references in natural syntax.
pub const KEY_NAMESPACE: &str = "Key";
pub const PARAM_NAMESPACE: &str = "P";

pub fn compile_expr(expr: &Expr, ctx: &CompileCtx) -> Result<ExprNode, Diagnostic> {
    match &expr.kind {
        ExprKind::Paren(inner) => compile_expr(inner, ctx),
        ExprKind::Number(raw) => compile_number(raw, expr, ctx),
        ExprKind::Null => Ok(ExprNode::ConstNull),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            arg,
        } => Ok(ExprNode::neg(compile_expr(arg, ctx)?)),
        ExprKind::Unary {
            op: UnaryOp::Plus,
            arg,
        } => compile_expr(arg, ctx),
        ExprKind::Binary { op, left, right } => match op {
            BinaryOp::Add => Ok(ExprNode::add(
                compile_expr(left, ctx)?,
                compile_expr(right, ctx)?,
            )),
            BinaryOp::Sub => Ok(ExprNode::sub(
                compile_expr(left, ctx)?,
                compile_expr(right, ctx)?,
            )),
            BinaryOp::Mul => Ok(ExprNode::mul(
                compile_expr(left, ctx)?,
                compile_expr(right, ctx)?,
            )),
            BinaryOp::Div => Err(ctx
                .diag(expr, "division is not supported")
                .with_hint("multiply by a precomputed reciprocal instead")),
            other => Err(ctx.diag(
                expr,
                format!("operator '{}' is not supported in expressions", other.as_str()),
            )),
        },
        ExprKind::Member { .. } => match expr.as_namespace_member() {
            Some((KEY_NAMESPACE, name)) => Ok(ExprNode::key(resolve_key(name, expr, ctx)?)),
            Some((PARAM_NAMESPACE, name)) => Ok(ExprNode::param(resolve_param(name, expr, ctx)?)),
            _ => Err(unsupported(expr, ctx)
                .with_hint("reference keys as Key.<name> and parameters as P.<name>")),
        },
        ExprKind::Call { callee, args } if is_ident(callee, "coalesce") => {
            if args.len() != 2 {
                return Err(ctx.diag(
                    expr,
                    format!("coalesce() takes exactly 2 arguments, got {}", args.len()),
                ));
            }
            Ok(ExprNode::coalesce(
                compile_expr(&args[0], ctx)?,
                compile_expr(&args[1], ctx)?,
            ))
        }
        ExprKind::Ident(_) => Err(unsupported(expr, ctx)
            .with_hint("write the expression inline, or build it explicitly with E.*")),
        _ => Err(unsupported(expr, ctx)),
    }
}

fn unsupported(expr: &Expr, ctx: &CompileCtx) -> Diagnostic {
    ctx.diag(
        expr,
        format!("unsupported expression construct: {}", expr.kind.name()),
    )
}

pub(super) fn is_ident(expr: &Expr, name: &str) -> bool {
    matches!(&expr.unparen().kind, ExprKind::Ident(n) if n == name)
}

fn compile_number(raw: &str, expr: &Expr, ctx: &CompileCtx) -> Result<ExprNode, Diagnostic> {
    match parse_number(raw) {
        Some(v) if v.is_finite() => Ok(ExprNode::number(v)),
        _ => Err(ctx.diag(expr, format!("numeric literal {} is not a finite number", raw))),
    }
}

pub(super) fn resolve_key(name: &str, at: &Expr, ctx: &CompileCtx) -> Result<u32, Diagnostic> {
    ctx.registry.key_id(name).ok_or_else(|| {
        let d = ctx.diag(at, format!("unknown key '{}'", name));
        match ctx.registry.suggest_key(name) {
            Some(s) => d.with_hint(format!("did you mean Key.{}?", s)),
            None => d,
        }
    })
}

pub(super) fn resolve_param(name: &str, at: &Expr, ctx: &CompileCtx) -> Result<u32, Diagnostic> {
    ctx.registry.param_id(name).ok_or_else(|| {
        let d = ctx.diag(at, format!("unknown param '{}'", name));
        match ctx.registry.suggest_param(name) {
            Some(s) => d.with_hint(format!("did you mean P.{}?", s)),
            None => d,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ctx_for, first_init};
    use super::*;
    use rankplan_ir::eval::{eval_expr, Row, Scalar};

    fn compile(text: &str) -> Result<ExprNode, Diagnostic> {
        let (src, module, registry) = ctx_for(&format!("const v = {};", text));
        let ctx = CompileCtx {
            registry: &registry,
            source: &src,
        };
        compile_expr(first_init(&module), &ctx)
    }

    #[test]
    fn end_to_end_example_shape() {
        let e = compile("Key.model_score_1 + Key.model_score_2 * P.weight").unwrap();
        assert_eq!(
            e,
            ExprNode::add(
                ExprNode::key(2),
                ExprNode::mul(ExprNode::key(3), ExprNode::param(1)),
            )
        );
    }

    #[test]
    fn parens_and_unary_plus_are_transparent() {
        assert_eq!(compile("((+Key.final_score))").unwrap(), ExprNode::key(1));
        assert_eq!(
            compile("-(1_000)").unwrap(),
            ExprNode::neg(ExprNode::number(1000.0))
        );
        assert_eq!(compile("null").unwrap(), ExprNode::ConstNull);
    }

    #[test]
    fn division_is_named_in_any_context() {
        for text in ["Key.final_score / 2", "1 + (Key.final_score / P.weight)", "coalesce(1 / 2, 0)"] {
            let err = compile(text).unwrap_err();
            assert_eq!(err.message, "division is not supported", "{}", text);
            assert!(err.hint.as_deref().unwrap_or("").contains("reciprocal"));
        }
    }

    #[test]
    fn coalesce_arity_is_exact() {
        let err = compile("coalesce(Key.final_score, 1, 2)").unwrap_err();
        assert_eq!(err.message, "coalesce() takes exactly 2 arguments, got 3");
        let err = compile("coalesce(Key.final_score)").unwrap_err();
        assert_eq!(err.message, "coalesce() takes exactly 2 arguments, got 1");
    }

    #[test]
    fn unknown_names_suggest_nearest() {
        let err = compile("Key.final_scor").unwrap_err();
        assert_eq!(err.message, "unknown key 'final_scor'");
        assert_eq!(err.hint.as_deref(), Some("did you mean Key.final_score?"));
        let err = compile("P.wieght").unwrap_err();
        assert_eq!(err.message, "unknown param 'wieght'");
    }

    #[test]
    fn other_shapes_report_their_kind_and_location() {
        let err = compile("Key.final_score ? 1 : 2").unwrap_err();
        assert_eq!(err.message, "unsupported expression construct: ConditionalExpression");
        assert_eq!((err.line, err.column), (1, 11));

        let err = compile("Math.max(1, 2)").unwrap_err();
        assert_eq!(err.message, "unsupported expression construct: CallExpression");

        let err = compile("\"abc\"").unwrap_err();
        assert_eq!(err.message, "unsupported expression construct: StringLiteral");

        let err = compile("Key.final_score % 2").unwrap_err();
        assert!(err.message.contains("'%'"));
    }

    #[test]
    fn non_finite_literal_rejected() {
        let err = compile("1e999").unwrap_err();
        assert!(err.message.contains("not a finite number"));
    }

    #[test]
    fn hex_literal_wider_than_u64_compiles() {
        let ir = compile("Key.final_score * 0x1_0000_0000_0000_0000").unwrap();
        let ExprNode::Mul { b, .. } = ir else {
            panic!("expected a product, got {:?}", ir);
        };
        assert_eq!(*b, ExprNode::number(18_446_744_073_709_551_616.0));
    }

    #[test]
    fn compiled_ir_matches_direct_evaluation() {
        let row = Row::new()
            .with_key(2, Scalar::Number(0.5))
            .with_key(3, Scalar::Number(4.0))
            .with_param(1, Scalar::Number(0.25));
        let (a, b, w) = (0.5_f64, 4.0_f64, 0.25_f64);
        let cases: Vec<(&str, f64)> = vec![
            ("Key.model_score_1 + Key.model_score_2 * P.weight", a + b * w),
            ("(Key.model_score_1 - Key.model_score_2) * -P.weight", (a - b) * -w),
            ("coalesce(Key.final_score, 7) + 1", 8.0),
            ("+Key.model_score_2 - 0.5e1", b - 5.0),
        ];
        for (text, expected) in cases {
            let e = compile(text).unwrap();
            assert_eq!(eval_expr(&e, &row), Some(expected), "{}", text);
        }
    }
}
