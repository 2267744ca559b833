//! Compile orchestration: plan source -> validated, canonical artifact.
//!
//! A thin driver that calls each pass in order:
//!
//! 1. parse the plan file
//! 2. extract natural expressions and predicates (pass 1)
//! 3. bundle the rewritten plan with the library modules (pass 2)
//! 4. evaluate the bundle in the sandbox (pass 3)
//! 5. assemble and validate the emitted artifact (pass 4)
//! 6. run capability governance and key-effect analysis (pass 5)
//!
//! Every stage is a pure function of its inputs; nothing is written
//! anywhere on any path.

use crate::config::CompilerConfig;
use crate::error::{CompileError, Diagnostic};
use crate::pass1_extract::{self, CompileCtx};
use crate::pass2_bundle::{self, BundleInput};
use crate::pass3_execute;
use crate::pass4_assemble::{self, AssembleInput};
use crate::pass5_analyze;
use crate::parser;
use crate::source::SourceFile;
use rankplan_analyze::{CapabilityRegistry, PlanInfo, TaskCatalog};
use rankplan_ir::{PlanArtifact, Registry};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A successful compile.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub artifact: PlanArtifact,
    /// Canonical serialization of `artifact`; the bytes to write out.
    pub canonical_json: String,
    pub plan_info: PlanInfo,
    /// Non-fatal bundler diagnostics.
    pub warnings: Vec<Diagnostic>,
    /// Lines the plan wrote through `console.log`.
    pub logs: Vec<String>,
}

/// Compiler front door. Holds the read-only inputs shared by every compile;
/// one instance may compile any number of plans, from any number of threads.
#[derive(Debug, Clone)]
pub struct Compiler<'r> {
    registry: &'r Registry,
    config: CompilerConfig,
    capabilities: CapabilityRegistry,
    catalog: TaskCatalog,
    modules: BTreeMap<String, String>,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Compiler {
            registry,
            config: CompilerConfig::default(),
            capabilities: CapabilityRegistry::standard(),
            catalog: TaskCatalog::standard(),
            modules: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_catalog(mut self, catalog: TaskCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Make `source` importable from plans under `specifier`.
    pub fn with_module(mut self, specifier: &str, source: impl Into<String>) -> Self {
        self.modules.insert(specifier.to_owned(), source.into());
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile one plan file. `file_name` is used for diagnostics and for
    /// the plan-name check; nothing is read from disk.
    pub fn compile(&self, file_name: &str, source: &str) -> Result<CompileOutput, CompileError> {
        let plan = SourceFile::new(file_name, source);

        let module = parser::parse(&plan).map_err(CompileError::Syntax)?;

        // Pass 1: extraction
        let ctx = CompileCtx {
            registry: self.registry,
            source: &plan,
        };
        let extraction = pass1_extract::extract(&module, &ctx).map_err(CompileError::Extraction)?;
        debug!(
            file = file_name,
            exprs = extraction.exprs.len(),
            preds = extraction.preds.len(),
            "extraction complete"
        );

        // Pass 2: bundling
        let bundle = pass2_bundle::bundle(&BundleInput {
            plan_file: file_name,
            plan_source: &extraction.source,
            registry: self.registry,
            extra_modules: &self.modules,
            original_plan: Some((&plan, &module)),
        })
        .map_err(CompileError::Syntax)?;
        let bundle_digest = bundle.digest();
        debug!(
            file = file_name,
            modules = bundle.modules.len(),
            digest = %bundle_digest,
            "bundle complete"
        );

        // Pass 3: sandboxed evaluation
        let execution =
            pass3_execute::execute(&bundle, &self.config.limits).map_err(CompileError::Execution)?;
        debug!(
            file = file_name,
            steps = execution.steps,
            nodes = execution.value["nodes"].as_array().map_or(0, Vec::len),
            "evaluation complete"
        );

        // Pass 4: assembly
        let artifact = pass4_assemble::assemble(AssembleInput {
            value: execution.value,
            extraction: &extraction,
            plan: &plan,
            registry: self.registry,
            config: &self.config,
            bundle_digest,
        })
        .map_err(CompileError::Validation)?;

        // Pass 5: analysis
        let plan_info = pass5_analyze::run(&artifact, &plan, &self.capabilities, &self.catalog)
            .map_err(|d| CompileError::Validation(vec![d]))?;

        let canonical_json = artifact.to_canonical_json().map_err(|e| {
            CompileError::Validation(vec![plan.diagnostic(Default::default(), e.to_string())])
        })?;

        info!(
            file = file_name,
            plan = %artifact.plan_name,
            nodes = artifact.nodes.len(),
            capabilities_digest = %plan_info.capabilities_digest,
            "plan compiled"
        );
        Ok(CompileOutput {
            artifact,
            canonical_json,
            plan_info,
            warnings: bundle.warnings,
            logs: execution.logs,
        })
    }
}

/// Compile one plan with the default configuration, capability registry and
/// task catalog.
pub fn compile(
    file_name: &str,
    source: &str,
    registry: &Registry,
) -> Result<CompileOutput, CompileError> {
    Compiler::new(registry).compile(file_name, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass1_extract::tests::test_registry;

    #[test]
    fn stage_failures_map_to_error_classes() {
        let registry = test_registry();
        let compiler = Compiler::new(&registry);

        let err = compiler.compile("a.plan.js", "const = 1;").unwrap_err();
        assert_eq!(err.kind(), "syntax");

        let src = r#"
import { definePlan } from "@rankplan/dsl";
import { Key } from "@rankplan/registry";
export default definePlan({ name: "a", build: (ctx) =>
  ctx.viewer.follow({ fanout: 10 }).vm({ outKey: Key.final_score, expr: Key.model_score_1 / 2 }),
});
"#;
        let err = compiler.compile("a.plan.js", src).unwrap_err();
        assert_eq!(err.kind(), "extraction");

        let err = compiler.compile("a.plan.js", "export default 1;").unwrap_err();
        assert_eq!(err.kind(), "execution");

        let src = r#"
import { definePlan } from "@rankplan/dsl";
export default definePlan({ name: "b", build: (ctx) => ctx.viewer.follow({ fanout: 10 }) });
"#;
        let err = compiler.compile("a.plan.js", src).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn host_modules_are_importable_when_registered() {
        let registry = test_registry();
        let compiler = Compiler::new(&registry).with_module(
            "@team/sources",
            r#"export function recent(ctx) { return ctx.viewer.follow({ fanout: 50 }); }"#,
        );
        let src = r#"
import { definePlan } from "@rankplan/dsl";
import { recent } from "@team/sources";
export default definePlan({ name: "team", build: (ctx) => recent(ctx).take({ count: 5 }) });
"#;
        let out = compiler.compile("team.plan.js", src).unwrap();
        assert_eq!(out.artifact.nodes.len(), 2);
        assert_eq!(out.artifact.outputs, vec!["n1".to_owned()]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn config_controls_suffix_and_provenance() {
        let registry = test_registry();
        let config = CompilerConfig::from_toml_str(
            "plan_suffix = \".rp.js\"\n[provenance]\nbackend = \"rust-ci\"\n",
        )
        .unwrap();
        let compiler = Compiler::new(&registry).with_config(config);
        let src = r#"
import { definePlan } from "@rankplan/dsl";
export default definePlan({ name: "c", build: (ctx) => ctx.viewer.follow({ fanout: 1 }) });
"#;
        let out = compiler.compile("c.rp.js", src).unwrap();
        let built_by = out.artifact.built_by.unwrap();
        assert_eq!(built_by.backend, "rust-ci");
        assert_eq!(built_by.tool, "rankplan");
        assert!(compiler.compile("c.plan.js", src).is_err());
    }
}
