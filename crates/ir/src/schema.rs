//! The shared artifact JSON Schema and its validator.
//!
//! Every producer and consumer validates against this one embedded schema
//! so that artifacts stay interchangeable between implementations.

use crate::error::IrError;
use serde_json::Value;

/// Raw text of the embedded plan artifact schema (draft 2020-12).
pub const ARTIFACT_SCHEMA: &str = include_str!("../schema/plan-artifact.schema.json");

/// Compiled artifact schema.
pub struct ArtifactValidator {
    validator: jsonschema::Validator,
}

impl ArtifactValidator {
    pub fn new() -> Result<Self, IrError> {
        let schema: Value = serde_json::from_str(ARTIFACT_SCHEMA)
            .map_err(|e| IrError::Schema(format!("failed to parse: {}", e)))?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| IrError::Schema(format!("failed to compile: {}", e)))?;
        Ok(ArtifactValidator { validator })
    }

    /// All schema violations in `doc`, one message each. Empty means valid.
    pub fn errors(&self, doc: &Value) -> Vec<String> {
        self.validator
            .iter_errors(doc)
            .map(|e| format!("{}", e))
            .collect()
    }

    pub fn validate(&self, doc: &Value) -> Result<(), IrError> {
        let errors = self.errors(doc);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IrError::Nonconforming(errors))
        }
    }

    pub fn is_valid(&self, doc: &Value) -> bool {
        self.validator.is_valid(doc)
    }
}
