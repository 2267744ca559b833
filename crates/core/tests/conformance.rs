//! Compiler conformance suite.
//!
//! Each positive case is a fixture pair under `conformance/plans/positive`:
//! - `<name>.plan.js`        -- plan source
//! - `<name>.expected.json`  -- expected artifact, without `built_by`
//!
//! Each negative case under `conformance/plans/negative` pairs the plan
//! with `<name>.expected-error.json`: the error class, a fragment of the
//! first diagnostic's message and, optionally, its line.

use rankplan_core::{CompileError, Compiler, PlanArtifact, Registry};
use rankplan_ir::{CmpOp, ExprNode, PredNode};
use std::path::{Path, PathBuf};

fn conformance_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conformance")
}

fn registry() -> Registry {
    let path = conformance_root().join("registry.json");
    let src = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    Registry::from_json_str(&src).unwrap_or_else(|e| panic!("Invalid registry: {}", e))
}

fn read_plan(dir: &str, name: &str) -> (String, String) {
    let file_name = format!("{}.plan.js", name);
    let path = conformance_root().join(dir).join(&file_name);
    let src = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    (file_name, src)
}

fn load_json(path: &Path) -> serde_json::Value {
    let src = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_str(&src).unwrap_or_else(|e| panic!("Invalid JSON in {}: {}", path.display(), e))
}

fn fixture_names(dir: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(conformance_root().join(dir))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".plan.js").map(str::to_owned)
        })
        .collect();
    names.sort();
    names
}

/// Compile a positive fixture and compare against its expected artifact.
fn run_positive_fixture(registry: &Registry, name: &str) {
    let (file_name, src) = read_plan("plans/positive", name);
    let out = Compiler::new(registry)
        .compile(&file_name, &src)
        .unwrap_or_else(|e| panic!("Failed to compile {}:\n{}", name, e));

    let expected_path = conformance_root()
        .join("plans/positive")
        .join(format!("{}.expected.json", name));
    let expected = PlanArtifact::from_json(&load_json(&expected_path))
        .unwrap_or_else(|e| panic!("Invalid expected artifact for {}: {}", name, e));

    let mut actual = out.artifact.clone();
    assert!(actual.built_by.take().is_some(), "{}: missing built_by", name);
    assert_eq!(
        actual,
        expected,
        "Artifact mismatch for {}\n\nActual:\n{}",
        name,
        serde_json::to_string_pretty(&actual).unwrap(),
    );
    assert!(
        out.warnings.is_empty(),
        "{}: unexpected warnings: {:?}",
        name,
        out.warnings
    );
}

/// Compile a negative fixture and check the error class and message.
fn run_negative_fixture(registry: &Registry, name: &str) {
    let (file_name, src) = read_plan("plans/negative", name);
    let expected = load_json(
        &conformance_root()
            .join("plans/negative")
            .join(format!("{}.expected-error.json", name)),
    );
    let err = match Compiler::new(registry).compile(&file_name, &src) {
        Ok(_) => panic!("Expected {} to fail, but it compiled", name),
        Err(e) => e,
    };
    assert_eq!(err.kind(), expected["kind"].as_str().unwrap(), "{}: {}", name, err);

    let first = err.diagnostics()[0].clone();
    let fragment = expected["message"].as_str().unwrap();
    assert!(
        first.message.contains(fragment),
        "{}: expected message containing {:?}, got {:?}",
        name,
        fragment,
        first.message
    );
    assert_eq!(first.file, file_name, "{}: diagnostic file", name);
    if let Some(line) = expected["line"].as_u64() {
        assert_eq!(first.line as u64, line, "{}: diagnostic line", name);
    }
}

#[test]
fn positive_plans() {
    let registry = registry();
    let names = fixture_names("plans/positive");
    assert!(!names.is_empty());
    for name in &names {
        run_positive_fixture(&registry, name);
    }
}

#[test]
fn negative_plans() {
    let registry = registry();
    let names = fixture_names("plans/negative");
    assert!(!names.is_empty());
    for name in &names {
        run_negative_fixture(&registry, name);
    }
}

// ──────────────────────────────────────────────
// Properties
// ──────────────────────────────────────────────

#[test]
fn recompiling_is_byte_identical() {
    let registry = registry();
    for name in fixture_names("plans/positive") {
        let (file_name, src) = read_plan("plans/positive", &name);
        let a = rankplan_core::compile(&file_name, &src, &registry).unwrap();
        let b = rankplan_core::compile(&file_name, &src, &registry).unwrap();
        assert_eq!(a.canonical_json, b.canonical_json, "{}", name);
        assert_eq!(a.plan_info, b.plan_info, "{}", name);
    }
}

#[test]
fn canonical_output_has_sorted_keys_and_no_whitespace() {
    let registry = registry();
    let (file_name, src) = read_plan("plans/positive", "home_feed");
    let out = rankplan_core::compile(&file_name, &src, &registry).unwrap();
    assert!(out.canonical_json.starts_with("{\"built_by\":{\"backend\":\"rust\""));
    assert!(!out.canonical_json.contains(": "));
    assert!(out.canonical_json.contains("\"value\":0.5"));
    let reparsed: serde_json::Value = serde_json::from_str(&out.canonical_json).unwrap();
    assert_eq!(PlanArtifact::from_json(&reparsed).unwrap(), out.artifact);
}

#[test]
fn vm_expression_is_extracted_and_referenced() {
    let registry = registry();
    let key = |n: &str| registry.key_id(n).unwrap();
    let src = r#"
import { definePlan } from "@rankplan/dsl";
import { Key, P } from "@rankplan/registry";
export default definePlan({
  name: "vm_only",
  build: (ctx) => ctx.viewer.follow({ fanout: 5 })
    .vm({ outKey: Key.final_score, expr: Key.model_score_1 + Key.model_score_2 * P.weight }),
});
"#;
    let out = rankplan_core::compile("vm_only.plan.js", src, &registry).unwrap();
    let artifact = out.artifact;
    assert_eq!(artifact.expr_table.len(), 1);
    let expected = ExprNode::add(
        ExprNode::key(key("model_score_1")),
        ExprNode::mul(
            ExprNode::key(key("model_score_2")),
            ExprNode::param(registry.param_id("weight").unwrap()),
        ),
    );
    let (id, node) = artifact.expr_table.iter().next().unwrap();
    assert_eq!(node, &expected);
    let vm = artifact.node("n1").unwrap();
    assert_eq!(vm.op, "core::vm");
    assert_eq!(vm.params["expr_id"], serde_json::json!(id));
    assert_eq!(vm.params["out_key"], serde_json::json!(key("final_score")));
}

#[test]
fn placeholders_and_builder_ids_share_the_tables() {
    let registry = registry();
    let src = r#"
import { definePlan, coalesce, E, Pr } from "@rankplan/dsl";
import { Key, P } from "@rankplan/registry";
export default definePlan({
  name: "mixed",
  build: (ctx) => ctx.viewer.follow({ fanout: 5 })
    .vm({ outKey: Key.final_score, expr: E.mul(Key.model_score_1, 2) })
    .vm({ outKey: Key.model_score_2, expr: coalesce(-Key.model_score_1, 0) })
    .filter({ pred: Pr.bool(true) })
    .filter({ pred: !(Key.final_score == null) || P.threshold <= Key.final_score }),
});
"#;
    let out = rankplan_core::compile("mixed.plan.js", src, &registry).unwrap();
    let a = out.artifact;
    let ids = |n: &str, p: &str| a.node(n).unwrap().params[p].as_str().unwrap().to_owned();
    // Builder-style entries come first; extracted ones follow.
    assert_eq!(ids("n1", "expr_id"), "e0");
    assert_eq!(ids("n2", "expr_id"), "e1");
    assert_eq!(ids("n3", "pred_id"), "p0");
    assert_eq!(ids("n4", "pred_id"), "p1");
    assert_eq!(
        a.expr_table["e1"],
        ExprNode::coalesce(ExprNode::neg(ExprNode::key(2)), ExprNode::number(0.0))
    );
    assert_eq!(
        a.pred_table["p1"],
        PredNode::or(
            PredNode::not(PredNode::IsNull { x: ExprNode::key(1) }),
            PredNode::cmp(CmpOp::Le, ExprNode::param(5), ExprNode::key(1)),
        )
    );
}

#[test]
fn extraction_errors_are_reported_together() {
    let registry = registry();
    let src = r#"
import { definePlan } from "@rankplan/dsl";
import { Key } from "@rankplan/registry";
export default definePlan({
  name: "many",
  build: (ctx) => ctx.viewer.follow({ fanout: 5 })
    .vm({ outKey: Key.final_score, expr: Key.model_score_1 / 2 })
    .filter({ pred: Key.country == "US" }),
});
"#;
    let err = rankplan_core::compile("many.plan.js", src, &registry).unwrap_err();
    let CompileError::Extraction(diags) = &err else {
        panic!("expected an extraction error, got {}", err);
    };
    assert_eq!(diags.len(), 2);
    assert_eq!((diags[0].line, diags[0].message.as_str()), (7, "division is not supported"));
    assert_eq!(diags[1].line, 8);
    assert_eq!(err.to_json_value()["kind"], "extraction");
}

#[test]
fn console_output_is_collected() {
    let registry = registry();
    let src = r#"
import { definePlan } from "@rankplan/dsl";
export default definePlan({
  name: "chatty",
  build: (ctx) => {
    const sizes = [10, 20];
    console.log("sizes", sizes.length);
    return sizes.map((n) => ctx.viewer.follow({ fanout: n }));
  },
});
"#;
    let out = rankplan_core::compile("chatty.plan.js", src, &registry).unwrap();
    assert_eq!(out.logs, vec!["sizes 2".to_owned()]);
    assert_eq!(out.artifact.outputs, vec!["n0".to_owned(), "n1".to_owned()]);
}

#[test]
fn concurrent_compiles_share_the_registry() {
    let registry = registry();
    let compiler = Compiler::new(&registry);
    let (file_name, src) = read_plan("plans/positive", "home_feed");
    let outputs: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| compiler.compile(&file_name, &src).unwrap().canonical_json))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}
