//! Integration tests for capability governance and key-effect analysis.
//!
//! These tests load artifact fixtures through the shared schema validator,
//! then run the same passes a consuming engine runs at load time.

use rankplan_analyze::{
    analyze, capabilities_digest, AnalysisError, CapabilityRegistry, EffectKind, TaskCatalog,
    WritesEffect,
};
use rankplan_ir::PlanArtifact;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Locate the workspace root.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

fn fixture_json(name: &str) -> Value {
    let path = workspace_root().join("conformance/artifacts").join(name);
    let src = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    serde_json::from_str(&src).unwrap_or_else(|e| panic!("invalid JSON in {}: {}", name, e))
}

fn load(doc: &Value) -> PlanArtifact {
    PlanArtifact::from_json(doc).unwrap_or_else(|e| panic!("artifact rejected: {}", e))
}

fn run(doc: &Value) -> Result<rankplan_analyze::PlanInfo, AnalysisError> {
    analyze(&load(doc), &CapabilityRegistry::standard(), &TaskCatalog::standard())
}

/// Two follow sources, each feeding one `{op, params}` node, joined by
/// `join_op`.
fn joined(join_op: &str, left: Value, right: Value) -> Value {
    json!({
        "schema_version": 1,
        "plan_name": "joined",
        "nodes": [
            {"node_id": "n0", "op": "viewer.follow", "inputs": [], "params": {"fanout": 10}},
            {"node_id": "n1", "op": left["op"], "inputs": ["n0"], "params": left["params"]},
            {"node_id": "n2", "op": "viewer.follow", "inputs": [], "params": {"fanout": 10}},
            {"node_id": "n3", "op": right["op"], "inputs": ["n2"], "params": right["params"]},
            {"node_id": "n4", "op": join_op, "inputs": ["n1", "n3"], "params": {"param_id": 3}}
        ],
        "outputs": ["n4"],
        "expr_table": {},
        "pred_table": {},
        "capabilities_required": [],
        "extensions": {}
    })
}

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

#[test]
fn minimal_plan_has_no_gating() {
    let info = run(&fixture_json("positive/minimal.json")).unwrap();
    assert_eq!(info.plan_name, "minimal");
    assert_eq!(info.capabilities_digest, "");
    assert_eq!(info.nodes.len(), 1);
    assert_eq!(info.nodes[0].writes_eval, WritesEffect::exact(Vec::<u32>::new()));
}

#[test]
fn vm_writes_its_out_key() {
    let info = run(&fixture_json("positive/vm_filter.json")).unwrap();
    assert_eq!(info.node("n1").unwrap().writes_eval, WritesEffect::exact([1]));
    assert_eq!(info.node("n2").unwrap().writes_eval, WritesEffect::exact(Vec::<u32>::new()));
    assert_eq!(info.capabilities_digest, "");
}

#[test]
fn capability_fixture_is_governed_and_digested() {
    let doc = fixture_json("positive/capabilities.json");
    let info = run(&doc).unwrap();
    let artifact = load(&doc);
    assert!(info.capabilities_digest.starts_with("sha256:"));
    assert_eq!(info.capabilities_digest.len(), "sha256:".len() + 64);
    assert_eq!(
        info.capabilities_digest,
        capabilities_digest(&artifact.capabilities_required, &artifact.extensions)
    );
}

#[test]
fn digest_ignores_source_key_order() {
    let a: Value = serde_json::from_str(
        r#"{"tenancy.partition": {"partition": "eu", "zone": 1}, "extensions.base": {}}"#,
    )
    .unwrap();
    let b: Value = serde_json::from_str(
        r#"{"extensions.base": {}, "tenancy.partition": {"zone": 1, "partition": "eu"}}"#,
    )
    .unwrap();
    let caps = vec!["extensions.base".to_owned(), "tenancy.partition".to_owned()];
    let to_map = |v: Value| serde_json::from_value(v).unwrap();
    assert_eq!(
        capabilities_digest(&caps, &to_map(a)),
        capabilities_digest(&caps, &to_map(b))
    );
}

// ──────────────────────────────────────────────
// Governor rejections
// ──────────────────────────────────────────────

#[test]
fn unsorted_or_duplicate_capabilities_rejected() {
    let mut doc = fixture_json("positive/capabilities.json");
    doc["capabilities_required"] = json!(["trace.sampling", "extensions.base"]);
    assert!(matches!(
        run(&doc),
        Err(AnalysisError::UnsortedCapabilities { .. })
    ));

    doc["capabilities_required"] = json!(["extensions.base", "extensions.base", "trace.sampling"]);
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::DuplicateCapability("extensions.base".to_owned())
    );
}

#[test]
fn undeclared_extensions_rejected() {
    let mut doc = fixture_json("positive/capabilities.json");
    doc["extensions"] = json!({"extensions.base": {}, "sources.cached_recommendation": null});
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::ExtensionNotRequired("sources.cached_recommendation".to_owned())
    );

    let mut doc = fixture_json("positive/capabilities.json");
    doc["capabilities_required"] = json!(["extensions.base"]);
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::NodeExtensionNotRequired {
            node_id: "n0".to_owned(),
            key: "trace.sampling".to_owned()
        }
    );
}

#[test]
fn payloads_checked_against_capability_schema() {
    let mut doc = fixture_json("positive/capabilities.json");
    doc["nodes"][0]["extensions"]["trace.sampling"] = json!({"rate": 2});
    let err = run(&doc).unwrap_err();
    let AnalysisError::InvalidPayload { cap, scope, .. } = &err else {
        panic!("expected an invalid payload, got {}", err);
    };
    assert_eq!((cap.as_str(), scope.as_str()), ("trace.sampling", "node:n0"));

    let mut doc = fixture_json("positive/minimal.json");
    doc["capabilities_required"] = json!(["tenancy.partition"]);
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::MissingPayload("tenancy.partition".to_owned())
    );

    doc["extensions"] = json!({"tenancy.partition": {"partition": ""}});
    assert!(matches!(run(&doc), Err(AnalysisError::InvalidPayload { .. })));
}

#[test]
fn unknown_and_blocked_capabilities_rejected() {
    let mut doc = fixture_json("positive/minimal.json");
    doc["capabilities_required"] = json!(["sources.future_thing"]);
    assert_eq!(
        run(&doc).unwrap_err().to_string(),
        "capability 'sources.future_thing' is not supported by this engine version"
    );
    doc["capabilities_required"] = json!(["legacy.unsafe_ops"]);
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::BlockedCapability("legacy.unsafe_ops".to_owned())
    );
}

// ──────────────────────────────────────────────
// Key effects and strict shape
// ──────────────────────────────────────────────

#[test]
fn stage_score_literal_stage_is_exact() {
    let stage = |s: &str| json!({"op": "core::stage_score", "params": {"stage": s, "esr_key": 2, "lsr_key": 3}});
    let info = run(&joined("core::branch", stage("esr"), stage("esr"))).unwrap();
    assert_eq!(info.node("n1").unwrap().writes_eval, WritesEffect::exact([2]));
    assert_eq!(info.node("n4").unwrap().writes_eval, WritesEffect::exact(Vec::<u32>::new()));
}

#[test]
fn request_time_stage_is_only_possible() {
    let by_param = json!({"op": "core::stage_score", "params": {"stage_param_id": 2, "esr_key": 2, "lsr_key": 3}});
    let literal = json!({"op": "core::stage_score", "params": {"stage": "esr", "esr_key": 2, "lsr_key": 3}});
    let doc = joined("core::fallback", by_param, literal);
    let err = run(&doc).unwrap_err();
    assert!(matches!(err, AnalysisError::StrictShape { ref node_id, .. } if node_id == "n4"));

    // The effect itself is still reported when no strict node consumes it.
    let mut doc = doc;
    doc["nodes"][4]["op"] = json!("core::concat");
    let info = run(&doc).unwrap();
    let n1 = &info.node("n1").unwrap().writes_eval;
    assert_eq!(n1.kind, EffectKind::May);
    assert_eq!(n1.keys, vec![2, 3]);
}

#[test]
fn branch_sides_must_write_identical_keys() {
    let vm = |k: u32| json!({"op": "core::vm", "params": {"out_key": k, "expr_id": "e0"}});
    let mut doc = joined("core::branch", vm(1), vm(1));
    doc["expr_table"] = json!({"e0": {"op": "const_number", "value": 1}});
    run(&doc).unwrap();

    let mut doc = joined("core::branch", vm(1), vm(2));
    doc["expr_table"] = json!({"e0": {"op": "const_number", "value": 1}});
    let err = run(&doc).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("node 'n4' (core::branch) requires provably identical write sets on every input"));
}

#[test]
fn unknown_op_rejected() {
    let mut doc = fixture_json("positive/minimal.json");
    doc["nodes"][0]["op"] = json!("viewer.teleport");
    assert_eq!(
        run(&doc).unwrap_err(),
        AnalysisError::UnknownOp {
            node_id: "n0".to_owned(),
            op: "viewer.teleport".to_owned()
        }
    );
}
