//! Predicate Compiler: one syntax subtree to a [`PredNode`].

use super::expr::{
    compile_expr, is_ident, resolve_key, resolve_param, KEY_NAMESPACE, PARAM_NAMESPACE,
};
use super::CompileCtx;
use crate::ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::error::Diagnostic;
use rankplan_ir::eval::compile_regex;
use rankplan_ir::{CmpOp, PredNode, RegexFlags, RegexPattern};

pub fn compile_pred(expr: &Expr, ctx: &CompileCtx) -> Result<PredNode, Diagnostic> {
    match &expr.kind {
        ExprKind::Paren(inner) => compile_pred(inner, ctx),
        ExprKind::Bool(value) => Ok(PredNode::ConstBool { value: *value }),
        ExprKind::Logical { op, left, right } => match op {
            LogicalOp::And => Ok(PredNode::and(
                compile_pred(left, ctx)?,
                compile_pred(right, ctx)?,
            )),
            LogicalOp::Or => Ok(PredNode::or(
                compile_pred(left, ctx)?,
                compile_pred(right, ctx)?,
            )),
            LogicalOp::Nullish => Err(ctx
                .diag(expr, "'??' is not a predicate operator")
                .with_hint("use coalesce(a, b) inside a comparison")),
        },
        ExprKind::Unary {
            op: UnaryOp::Not,
            arg,
        } => Ok(PredNode::not(compile_pred(arg, ctx)?)),
        ExprKind::Binary { op, left, right } if op.is_comparison() => {
            compile_comparison(*op, left, right, expr, ctx)
        }
        ExprKind::Binary { op, .. } => Err(ctx
            .diag(
                expr,
                format!("arithmetic operator '{}' is not a predicate", op.as_str()),
            )
            .with_hint("compare the value, e.g. (a + b) > 0")),
        ExprKind::Call { callee, args } if is_ident(callee, "regex") => {
            compile_regex_call(args, expr, ctx)
        }
        _ => Err(ctx.diag(
            expr,
            format!("unsupported predicate construct: {}", expr.kind.name()),
        )),
    }
}

fn normalize(op: BinaryOp) -> Option<CmpOp> {
    match op {
        BinaryOp::Eq | BinaryOp::StrictEq => Some(CmpOp::Eq),
        BinaryOp::Ne | BinaryOp::StrictNe => Some(CmpOp::Ne),
        BinaryOp::Lt => Some(CmpOp::Lt),
        BinaryOp::Le => Some(CmpOp::Le),
        BinaryOp::Gt => Some(CmpOp::Gt),
        BinaryOp::Ge => Some(CmpOp::Ge),
        _ => None,
    }
}

fn compile_comparison(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    whole: &Expr,
    ctx: &CompileCtx,
) -> Result<PredNode, Diagnostic> {
    let cmp = normalize(op).ok_or_else(|| {
        ctx.diag(
            whole,
            format!("operator '{}' is not a comparison", op.as_str()),
        )
    })?;
    let (l, r) = (left.unparen(), right.unparen());

    for side in [l, r] {
        if matches!(side.kind, ExprKind::Undefined) {
            return Err(ctx
                .diag(side, "comparison against undefined is not supported")
                .with_hint("missing values are null; compare against null instead"));
        }
    }

    let l_null = matches!(l.kind, ExprKind::Null);
    let r_null = matches!(r.kind, ExprKind::Null);
    if l_null && r_null {
        return Err(ctx.diag(whole, "comparison between two null literals is constant"));
    }
    if l_null || r_null {
        let other = if l_null { r } else { l };
        let x = compile_term(other, ctx)?;
        return match cmp {
            CmpOp::Eq => Ok(PredNode::IsNull { x }),
            CmpOp::Ne => Ok(PredNode::NotNull { x }),
            _ => Err(ctx
                .diag(
                    whole,
                    format!("operator '{}' cannot be used with null", op.as_str()),
                )
                .with_hint("only == null and != null are allowed")),
        };
    }

    Ok(PredNode::cmp(cmp, compile_term(l, ctx)?, compile_term(r, ctx)?))
}

/// Comparison operands: number, null, `-number`, `Key.*`, `P.*`.
fn compile_term(expr: &Expr, ctx: &CompileCtx) -> Result<rankplan_ir::ExprNode, Diagnostic> {
    let inner = expr.unparen();
    match &inner.kind {
        ExprKind::Number(_) | ExprKind::Null => compile_expr(inner, ctx),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            arg,
        } if matches!(arg.unparen().kind, ExprKind::Number(_)) => compile_expr(inner, ctx),
        ExprKind::Member { .. }
            if matches!(
                inner.as_namespace_member(),
                Some((KEY_NAMESPACE | PARAM_NAMESPACE, _))
            ) =>
        {
            compile_expr(inner, ctx)
        }
        ExprKind::Str(_) => Err(ctx
            .diag(inner, "string literals cannot be compared")
            .with_hint("match text with regex(Key.<name>, \"^value$\")")),
        _ => Err(ctx
            .diag(
                inner,
                format!("unsupported comparison operand: {}", inner.kind.name()),
            )
            .with_hint("operands must be numbers, null, Key.<name> or P.<name>")),
    }
}

fn compile_regex_call(
    args: &[Expr],
    whole: &Expr,
    ctx: &CompileCtx,
) -> Result<PredNode, Diagnostic> {
    if !(2..=3).contains(&args.len()) {
        return Err(ctx.diag(
            whole,
            format!("regex() takes 2 or 3 arguments, got {}", args.len()),
        ));
    }

    let key_arg = args[0].unparen();
    let key_id = match key_arg.as_namespace_member() {
        Some((KEY_NAMESPACE, name)) => resolve_key(name, key_arg, ctx)?,
        _ => {
            return Err(ctx.diag(
                key_arg,
                "regex() first argument must be a key reference (Key.<name>)",
            ))
        }
    };

    let flags = match args.get(2).map(Expr::unparen) {
        None => RegexFlags::None,
        Some(arg) => match &arg.kind {
            ExprKind::Str(s) => RegexFlags::parse(s).ok_or_else(|| {
                ctx.diag(arg, format!("regex() flags must be \"\" or \"i\", got \"{}\"", s))
            })?,
            _ => {
                return Err(ctx.diag(arg, "regex() flags must be a string literal"));
            }
        },
    };

    let pattern_arg = args[1].unparen();
    let pattern = match &pattern_arg.kind {
        ExprKind::Str(s) => {
            compile_regex(s, flags).map_err(|e| ctx.diag(pattern_arg, e.to_string()))?;
            RegexPattern::Literal { value: s.clone() }
        }
        _ => match pattern_arg.as_namespace_member() {
            Some((PARAM_NAMESPACE, name)) => RegexPattern::Param {
                param_id: resolve_param(name, pattern_arg, ctx)?,
            },
            _ => {
                return Err(ctx.diag(
                    pattern_arg,
                    "regex() pattern must be a string literal or a P.<name> reference",
                ))
            }
        },
    };

    Ok(PredNode::Regex {
        key_id,
        pattern,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ctx_for, first_init};
    use super::*;
    use rankplan_ir::eval::{eval_pred, Row, Scalar};
    use rankplan_ir::ExprNode;

    fn compile(text: &str) -> Result<PredNode, Diagnostic> {
        let (src, module, registry) = ctx_for(&format!("const v = {};", text));
        let ctx = CompileCtx {
            registry: &registry,
            source: &src,
        };
        compile_pred(first_init(&module), &ctx)
    }

    #[test]
    fn strict_and_loose_equality_normalize_to_one_kind() {
        assert_eq!(compile("Key.final_score === 1"), compile("Key.final_score == 1"));
        assert_eq!(compile("Key.final_score !== 1"), compile("Key.final_score != 1"));
        assert_eq!(
            compile("Key.final_score === 1").unwrap(),
            PredNode::cmp(CmpOp::Eq, ExprNode::key(1), ExprNode::number(1.0))
        );
    }

    #[test]
    fn null_comparisons_become_null_tests() {
        assert_eq!(
            compile("Key.final_score == null").unwrap(),
            PredNode::IsNull {
                x: ExprNode::key(1)
            }
        );
        assert_eq!(
            compile("null !== P.weight").unwrap(),
            PredNode::NotNull {
                x: ExprNode::param(1)
            }
        );
        let err = compile("Key.final_score < null").unwrap_err();
        assert_eq!(err.message, "operator '<' cannot be used with null");
        let err = compile("null == null").unwrap_err();
        assert!(err.message.contains("two null literals"));
    }

    #[test]
    fn undefined_and_strings_rejected() {
        let err = compile("Key.final_score === undefined").unwrap_err();
        assert_eq!(err.message, "comparison against undefined is not supported");
        let err = compile("Key.country == \"US\"").unwrap_err();
        assert_eq!(err.message, "string literals cannot be compared");
        assert!(err.hint.unwrap().contains("regex("));
    }

    #[test]
    fn operands_are_restricted_terms() {
        assert!(compile("Key.final_score > -1").is_ok());
        let err = compile("Key.final_score + 1 > 2").unwrap_err();
        assert_eq!(err.message, "unsupported comparison operand: BinaryExpression");
        let err = compile("Key.final_score ?? 0").unwrap_err();
        assert!(err.message.contains("'??'"));
        let err = compile("Key.final_score").unwrap_err();
        assert_eq!(err.message, "unsupported predicate construct: MemberExpression");
    }

    #[test]
    fn regex_forms() {
        assert_eq!(
            compile("regex(Key.country, \"^us$\", \"i\")").unwrap(),
            PredNode::Regex {
                key_id: 4,
                pattern: RegexPattern::Literal {
                    value: "^us$".to_owned()
                },
                flags: RegexFlags::CaseInsensitive,
            }
        );
        assert_eq!(
            compile("regex(Key.country, P.pattern)").unwrap(),
            PredNode::Regex {
                key_id: 4,
                pattern: RegexPattern::Param { param_id: 4 },
                flags: RegexFlags::None,
            }
        );
        let err = compile("regex(Key.country)").unwrap_err();
        assert_eq!(err.message, "regex() takes 2 or 3 arguments, got 1");
        let err = compile("regex(P.pattern, \"x\")").unwrap_err();
        assert!(err.message.contains("first argument must be a key reference"));
        let err = compile("regex(Key.country, \"x\", \"g\")").unwrap_err();
        assert!(err.message.contains("flags must be"));
        let err = compile("regex(Key.country, \"(unclosed\")").unwrap_err();
        assert!(err.message.starts_with("invalid regex pattern"));
    }

    #[test]
    fn normalization_holds_for_nan_and_null_operands() {
        // == and === agree for every operand class the grammar admits,
        // including NaN and missing (null) values.
        let rows = [
            Row::new().with_key(1, Scalar::Number(f64::NAN)),
            Row::new().with_key(1, Scalar::Number(1.0)),
            Row::new(),
        ];
        let pairs = [
            ("Key.final_score === 1", "Key.final_score == 1"),
            ("Key.final_score !== 1", "Key.final_score != 1"),
            ("Key.final_score === null", "Key.final_score == null"),
            ("Key.final_score !== null", "Key.final_score != null"),
            ("Key.final_score === P.weight", "Key.final_score == P.weight"),
        ];
        for row in &rows {
            for (strict, loose) in pairs {
                let a = eval_pred(&compile(strict).unwrap(), row).unwrap();
                let b = eval_pred(&compile(loose).unwrap(), row).unwrap();
                assert_eq!(a, b, "{} vs {}", strict, loose);
            }
        }
        // NaN is never equal to itself, and never "not equal" to null.
        let nan_row = &rows[0];
        assert!(!eval_pred(&compile("Key.final_score == 1").unwrap(), nan_row).unwrap());
        assert!(eval_pred(&compile("Key.final_score != null").unwrap(), nan_row).unwrap());
    }

    #[test]
    fn compiled_predicates_match_direct_evaluation() {
        let row = Row::new()
            .with_key(1, Scalar::Number(3.0))
            .with_key(4, Scalar::Text("United States".to_owned()))
            .with_param(5, Scalar::Number(2.0));
        let cases = [
            ("Key.final_score > P.threshold && !(Key.final_score >= 10)", true),
            ("Key.final_score < P.threshold || false", false),
            ("regex(Key.country, \"^united\", \"i\") && Key.model_score_1 == null", true),
            ("!(Key.final_score != 3)", true),
        ];
        for (text, expected) in cases {
            let p = compile(text).unwrap();
            assert_eq!(eval_pred(&p, &row).unwrap(), expected, "{}", text);
        }
    }
}
