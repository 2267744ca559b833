//! Pass 5: capability governance and key-effect analysis.
//!
//! Thin adapter over `rankplan-analyze`: the same passes a consuming engine
//! runs at load time, reported as compiler diagnostics against the plan.

use crate::ast::Span;
use crate::error::Diagnostic;
use crate::source::SourceFile;
use rankplan_analyze::{analyze, AnalysisError, CapabilityRegistry, PlanInfo, TaskCatalog};
use rankplan_ir::PlanArtifact;

pub fn run(
    artifact: &PlanArtifact,
    plan: &SourceFile,
    capabilities: &CapabilityRegistry,
    catalog: &TaskCatalog,
) -> Result<PlanInfo, Diagnostic> {
    analyze(artifact, capabilities, catalog).map_err(|e| {
        let hint = hint_for(&e);
        let diag = plan.diagnostic(Span::default(), e.to_string());
        match hint {
            Some(h) => diag.with_hint(h),
            None => diag,
        }
    })
}

fn hint_for(err: &AnalysisError) -> Option<&'static str> {
    match err {
        AnalysisError::UnsortedCapabilities { .. } | AnalysisError::DuplicateCapability(_) => {
            Some("declare capabilities with ctx.requireCapability(id, payload), which keeps them sorted and unique")
        }
        AnalysisError::UnsupportedCapability(_) | AnalysisError::BlockedCapability(_) => {
            Some("remove the capability or upgrade the engine that will load this plan")
        }
        AnalysisError::ExtensionNotRequired(_) | AnalysisError::NodeExtensionNotRequired { .. } => {
            Some("add the extension key to the plan's capabilities")
        }
        _ => None,
    }
}
