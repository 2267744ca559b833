//! rankplan static analysis over validated plan artifacts.
//!
//! These passes run after the compiler has assembled an artifact, and a
//! consuming engine runs the same passes again at load time:
//!
//! - [`capabilities`] -- capability/extension governance and the canonical
//!   `capabilities_digest`
//! - [`writes_effect`] -- the `Exact | May | Unknown` key-effect algebra
//! - [`catalog`] -- per-op write contracts
//! - [`plan_info`] -- per-node `writes_eval` and strict-shape checks

pub mod capabilities;
pub mod catalog;
pub mod error;
pub mod plan_info;
pub mod writes_effect;

pub use capabilities::{
    capabilities_digest, check_capabilities, CapabilityMeta, CapabilityRegistry, CapabilityStatus,
};
pub use catalog::{TaskCatalog, TaskSpec};
pub use error::AnalysisError;
pub use plan_info::{plan_info, NodeInfo, PlanInfo};
pub use writes_effect::{
    eval_writes, EffectBinding, EffectEnv, EffectKind, EnumDomains, WritesEffect, WritesEffectExpr,
};

use rankplan_ir::PlanArtifact;

/// Run the governor, then the key-effect pass.
pub fn analyze(
    artifact: &PlanArtifact,
    capabilities: &CapabilityRegistry,
    catalog: &TaskCatalog,
) -> Result<PlanInfo, AnalysisError> {
    check_capabilities(artifact, capabilities)?;
    plan_info(artifact, catalog)
}
