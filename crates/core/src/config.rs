//! Compiler configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! # Example
//!
//! ```toml
//! plan_suffix = ".plan.js"
//!
//! [limits]
//! max_steps = 1000000
//! max_call_depth = 128
//! max_heap_cells = 1000000
//!
//! [provenance]
//! backend = "rust"
//! tool = "rankplan"
//! ```

use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Stripped from the input file name to derive the expected plan name.
    pub plan_suffix: String,
    pub limits: SandboxLimits,
    pub provenance: Provenance,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            plan_suffix: ".plan.js".to_owned(),
            limits: SandboxLimits::default(),
            provenance: Provenance::default(),
        }
    }
}

/// `[limits]`: budgets for one sandbox evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxLimits {
    /// Statements plus expressions evaluated.
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Heap allocations plus stored properties and elements.
    pub max_heap_cells: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        SandboxLimits {
            max_steps: 1_000_000,
            max_call_depth: 128,
            max_heap_cells: 1_000_000,
        }
    }
}

/// `[provenance]`: the `backend` and `tool` fields of `built_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Provenance {
    pub backend: String,
    pub tool: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Provenance {
            backend: "rust".to_owned(),
            tool: "rankplan".to_owned(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid compiler config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl CompilerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Expected plan name for an input file: the base name with
    /// `plan_suffix` removed. `None` when the suffix does not match.
    pub fn expected_plan_name<'f>(&self, file_name: &'f str) -> Option<&'f str> {
        let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
        base.strip_suffix(self.plan_suffix.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(CompilerConfig::from_toml_str("").unwrap(), CompilerConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = CompilerConfig::from_toml_str("[limits]\nmax_steps = 500\n").unwrap();
        assert_eq!(cfg.limits.max_steps, 500);
        assert_eq!(cfg.limits.max_call_depth, 128);
        assert_eq!(cfg.provenance.tool, "rankplan");
        assert_eq!(cfg.plan_suffix, ".plan.js");
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = CompilerConfig::from_toml_str("[limits]\nmax_stepz = 5\n").unwrap_err();
        assert!(err.to_string().contains("max_stepz"), "{}", err);
        assert!(CompilerConfig::from_toml_str("verbose = true").is_err());
    }

    #[test]
    fn expected_name_strips_directory_and_suffix() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.expected_plan_name("plans/home_feed.plan.js"), Some("home_feed"));
        assert_eq!(cfg.expected_plan_name("home_feed.plan.js"), Some("home_feed"));
        assert_eq!(cfg.expected_plan_name("home_feed.js"), None);
    }
}
