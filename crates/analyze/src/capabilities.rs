//! Capability & extensions governor, plus the canonical capabilities digest.
//!
//! Consumers run the same checks at load time, so everything here works on
//! the artifact alone (plus the injected [`CapabilityRegistry`]).

use crate::error::AnalysisError;
use rankplan_ir::canonical::to_canonical_string;
use rankplan_ir::PlanArtifact;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Implemented,
    Experimental,
    Blocked,
}

/// Registry entry for one capability id.
#[derive(Debug, Clone)]
pub struct CapabilityMeta {
    pub id: String,
    pub status: CapabilityStatus,
    /// JSON Schema for the payload. `None` admits only an absent payload.
    pub payload_schema: Option<Value>,
    /// The plan must carry a plan-level `extensions` entry for this id.
    pub requires_payload: bool,
}

impl CapabilityMeta {
    pub fn gate(id: &str, status: CapabilityStatus) -> Self {
        CapabilityMeta {
            id: id.to_owned(),
            status,
            payload_schema: None,
            requires_payload: false,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.payload_schema = Some(schema);
        self
    }

    pub fn requiring_payload(mut self) -> Self {
        self.requires_payload = true;
        self
    }
}

/// Known capabilities, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    caps: BTreeMap<String, CapabilityMeta>,
}

impl CapabilityRegistry {
    pub fn new(caps: impl IntoIterator<Item = CapabilityMeta>) -> Self {
        CapabilityRegistry {
            caps: caps.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    /// The capabilities this release ships with.
    pub fn standard() -> Self {
        CapabilityRegistry::new([
            CapabilityMeta::gate("extensions.base", CapabilityStatus::Implemented).with_schema(
                json!({"type": "object", "additionalProperties": false}),
            ),
            CapabilityMeta::gate("sources.cached_recommendation", CapabilityStatus::Implemented),
            CapabilityMeta::gate("trace.sampling", CapabilityStatus::Experimental).with_schema(
                json!({
                    "type": "object",
                    "required": ["rate"],
                    "properties": {"rate": {"type": "number", "minimum": 0, "maximum": 1}},
                    "additionalProperties": false
                }),
            ),
            CapabilityMeta::gate("tenancy.partition", CapabilityStatus::Implemented)
                .with_schema(json!({
                    "type": "object",
                    "required": ["partition"],
                    "properties": {"partition": {"type": "string", "minLength": 1}},
                    "additionalProperties": false
                }))
                .requiring_payload(),
            CapabilityMeta::gate("legacy.unsafe_ops", CapabilityStatus::Blocked),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&CapabilityMeta> {
        self.caps.get(id)
    }

    /// Known and not blocked.
    pub fn is_supported(&self, id: &str) -> bool {
        self.caps
            .get(id)
            .map_or(false, |m| m.status != CapabilityStatus::Blocked)
    }
}

// ──────────────────────────────────────────────
// Governor
// ──────────────────────────────────────────────

/// Enforce every capability/extension rule on a validated artifact.
pub fn check_capabilities(
    artifact: &PlanArtifact,
    registry: &CapabilityRegistry,
) -> Result<(), AnalysisError> {
    check_sorted_unique(&artifact.capabilities_required)?;
    let required: HashSet<&str> = artifact
        .capabilities_required
        .iter()
        .map(String::as_str)
        .collect();

    for cap in &artifact.capabilities_required {
        match registry.get(cap) {
            None => return Err(AnalysisError::UnsupportedCapability(cap.clone())),
            Some(meta) if meta.status == CapabilityStatus::Blocked => {
                return Err(AnalysisError::BlockedCapability(cap.clone()))
            }
            Some(_) => {}
        }
    }

    for (key, payload) in &artifact.extensions {
        if !required.contains(key.as_str()) {
            return Err(AnalysisError::ExtensionNotRequired(key.clone()));
        }
        validate_payload(registry, key, payload, "plan")?;
    }

    for cap in &artifact.capabilities_required {
        let needs_entry = registry.get(cap).map_or(false, |m| m.requires_payload);
        if needs_entry && !artifact.extensions.contains_key(cap) {
            return Err(AnalysisError::MissingPayload(cap.clone()));
        }
    }

    for node in &artifact.nodes {
        for (key, payload) in &node.extensions {
            if !required.contains(key.as_str()) {
                return Err(AnalysisError::NodeExtensionNotRequired {
                    node_id: node.node_id.clone(),
                    key: key.clone(),
                });
            }
            validate_payload(registry, key, payload, &format!("node:{}", node.node_id))?;
        }
    }

    tracing::debug!(
        capabilities = artifact.capabilities_required.len(),
        extensions = artifact.extensions.len(),
        "capabilities governed"
    );
    Ok(())
}

/// Strictly ascending; never re-sorted on the caller's behalf.
pub fn check_sorted_unique(caps: &[String]) -> Result<(), AnalysisError> {
    for pair in caps.windows(2) {
        if pair[0] == pair[1] {
            return Err(AnalysisError::DuplicateCapability(pair[0].clone()));
        }
        if pair[0] > pair[1] {
            return Err(AnalysisError::UnsortedCapabilities {
                prev: pair[0].clone(),
                next: pair[1].clone(),
            });
        }
    }
    Ok(())
}

/// Payload policy: no schema admits only `null`; with a schema, `null` is
/// allowed and anything else must be an object that satisfies it.
pub fn validate_payload(
    registry: &CapabilityRegistry,
    cap: &str,
    payload: &Value,
    scope: &str,
) -> Result<(), AnalysisError> {
    let Some(meta) = registry.get(cap) else {
        return Err(AnalysisError::UnsupportedCapability(cap.to_owned()));
    };
    let invalid = |message: String| AnalysisError::InvalidPayload {
        cap: cap.to_owned(),
        scope: scope.to_owned(),
        message,
    };

    let Some(schema) = &meta.payload_schema else {
        if payload.is_null() {
            return Ok(());
        }
        return Err(invalid("no payload allowed".to_owned()));
    };
    if payload.is_null() {
        return Ok(());
    }
    if !payload.is_object() {
        return Err(invalid(format!(
            "payload must be an object, got {}",
            json_type_name(payload)
        )));
    }
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| AnalysisError::Internal(format!("payload schema for '{}': {}", cap, e)))?;
    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|e| format!("{}", e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(invalid(errors.join("; ")))
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ──────────────────────────────────────────────
// Digest
// ──────────────────────────────────────────────

/// `"sha256:<hex>"` over the canonical form of
/// `{"capabilities_required": [...], "extensions": {...}}`, or `""` when
/// both are empty.
pub fn capabilities_digest(capabilities_required: &[String], extensions: &BTreeMap<String, Value>) -> String {
    if capabilities_required.is_empty() && extensions.is_empty() {
        return String::new();
    }
    let canonical = to_canonical_string(&json!({
        "capabilities_required": capabilities_required,
        "extensions": extensions,
    }));
    let hash = Sha256::digest(canonical.as_bytes());
    format!("sha256:{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankplan_ir::{PlanNode, SCHEMA_VERSION};
    use serde_json::Map;

    fn artifact(caps: &[&str], exts: Value) -> PlanArtifact {
        PlanArtifact {
            schema_version: SCHEMA_VERSION,
            plan_name: "demo".to_owned(),
            nodes: vec![PlanNode {
                node_id: "n0".to_owned(),
                op: "viewer.follow".to_owned(),
                inputs: vec![],
                params: Map::new(),
                trace: None,
                extensions: BTreeMap::new(),
            }],
            outputs: vec!["n0".to_owned()],
            expr_table: BTreeMap::new(),
            pred_table: BTreeMap::new(),
            capabilities_required: caps.iter().map(|s| s.to_string()).collect(),
            extensions: serde_json::from_value(exts).unwrap(),
            built_by: None,
        }
    }

    #[test]
    fn empty_digest_is_empty_string() {
        assert_eq!(capabilities_digest(&[], &BTreeMap::new()), "");
    }

    #[test]
    fn digest_is_sha256_of_canonical_form() {
        let caps = vec!["extensions.base".to_owned()];
        let exts: BTreeMap<String, Value> =
            serde_json::from_value(json!({"extensions.base": {}})).unwrap();
        let expected = format!(
            "sha256:{:x}",
            Sha256::digest(br#"{"capabilities_required":["extensions.base"],"extensions":{"extensions.base":{}}}"#)
        );
        assert_eq!(capabilities_digest(&caps, &exts), expected);
    }

    #[test]
    fn digest_ignores_payload_key_order() {
        let caps = vec!["trace.sampling".to_owned()];
        let a: BTreeMap<String, Value> = serde_json::from_str(
            r#"{"trace.sampling":{"rate":0.5,"mode":"head"}}"#,
        )
        .unwrap();
        let b: BTreeMap<String, Value> = serde_json::from_str(
            r#"{"trace.sampling":{"mode":"head","rate":0.5}}"#,
        )
        .unwrap();
        assert_eq!(capabilities_digest(&caps, &a), capabilities_digest(&caps, &b));
        assert!(capabilities_digest(&caps, &a).starts_with("sha256:"));
    }

    #[test]
    fn unsorted_and_duplicate_caps_rejected() {
        let reg = CapabilityRegistry::standard();
        let err = check_capabilities(&artifact(&["trace.sampling", "extensions.base"], json!({})), &reg)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnsortedCapabilities { .. }));
        let err = check_capabilities(&artifact(&["extensions.base", "extensions.base"], json!({})), &reg)
            .unwrap_err();
        assert_eq!(err, AnalysisError::DuplicateCapability("extensions.base".to_owned()));
    }

    #[test]
    fn extension_key_must_be_required() {
        let reg = CapabilityRegistry::standard();
        let err = check_capabilities(&artifact(&[], json!({"extensions.base": {}})), &reg).unwrap_err();
        assert_eq!(err, AnalysisError::ExtensionNotRequired("extensions.base".to_owned()));
    }

    #[test]
    fn node_extension_key_must_be_required() {
        let reg = CapabilityRegistry::standard();
        let mut a = artifact(&["extensions.base"], json!({}));
        a.nodes[0]
            .extensions
            .insert("trace.sampling".to_owned(), json!({"rate": 0.1}));
        let err = check_capabilities(&a, &reg).unwrap_err();
        assert_eq!(
            err.to_string(),
            "node 'n0' extension key 'trace.sampling' requires plan capability 'trace.sampling'"
        );
    }

    #[test]
    fn unknown_and_blocked_caps_rejected() {
        let reg = CapabilityRegistry::standard();
        assert!(matches!(
            check_capabilities(&artifact(&["made.up"], json!({})), &reg),
            Err(AnalysisError::UnsupportedCapability(_))
        ));
        assert!(matches!(
            check_capabilities(&artifact(&["legacy.unsafe_ops"], json!({})), &reg),
            Err(AnalysisError::BlockedCapability(_))
        ));
        assert!(!reg.is_supported("legacy.unsafe_ops"));
    }

    #[test]
    fn payload_policy() {
        let reg = CapabilityRegistry::standard();
        // no schema: only null
        assert!(validate_payload(&reg, "sources.cached_recommendation", &Value::Null, "plan").is_ok());
        assert!(validate_payload(&reg, "sources.cached_recommendation", &json!({}), "plan").is_err());
        // schema: null or conforming object
        assert!(validate_payload(&reg, "extensions.base", &Value::Null, "plan").is_ok());
        assert!(validate_payload(&reg, "extensions.base", &json!({}), "plan").is_ok());
        assert!(validate_payload(&reg, "extensions.base", &json!({"x": 1}), "plan").is_err());
        let err = validate_payload(&reg, "trace.sampling", &json!([1]), "node:n3").unwrap_err();
        assert_eq!(
            err.to_string(),
            "capability 'trace.sampling' at node:n3: payload must be an object, got array"
        );
        assert!(validate_payload(&reg, "trace.sampling", &json!({"rate": 2}), "plan").is_err());
    }

    #[test]
    fn required_payload_must_be_present() {
        let reg = CapabilityRegistry::standard();
        let err = check_capabilities(&artifact(&["tenancy.partition"], json!({})), &reg).unwrap_err();
        assert_eq!(err, AnalysisError::MissingPayload("tenancy.partition".to_owned()));
        let ok = artifact(&["tenancy.partition"], json!({"tenancy.partition": {"partition": "eu"}}));
        assert!(check_capabilities(&ok, &reg).is_ok());
    }
}
