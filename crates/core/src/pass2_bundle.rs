//! Pass 2: import resolution, cycle detection, bundle assembly.
//!
//! Every specifier resolves to an in-memory virtual module: the rewritten
//! plan, the embedded library, the generated registry, or a module the host
//! registered with the compiler. Host APIs and relative paths never resolve.

use crate::ast::{self, ExprKind, ImportClause, Item, Module, Property, Span};
use crate::error::Diagnostic;
use crate::library::{self, DSL_SPECIFIER, ENTRY_SPECIFIER, REGISTRY_SPECIFIER};
use crate::parser;
use crate::source::SourceFile;
use rankplan_ir::registry::edit_distance;
use rankplan_ir::Registry;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Names of execution-host modules. Importing any of these, or anything
/// under `node:`, is rejected.
const HOST_MODULES: &[&str] = &[
    "fs",
    "path",
    "os",
    "process",
    "child_process",
    "http",
    "https",
    "net",
    "tls",
    "dns",
    "crypto",
    "url",
    "util",
    "vm",
    "worker_threads",
    "events",
    "stream",
    "buffer",
    "zlib",
];

/// One parsed module of the bundle.
#[derive(Debug)]
pub struct BundledModule {
    pub specifier: String,
    pub source: SourceFile,
    pub module: Module,
}

/// The bundled unit: modules in dependency order, the entry last.
#[derive(Debug)]
pub struct Bundle {
    pub modules: Vec<BundledModule>,
    pub warnings: Vec<Diagnostic>,
    /// Concatenated module sources; input to the bundle digest.
    pub unit_text: String,
}

impl Bundle {
    pub fn module(&self, specifier: &str) -> Option<&BundledModule> {
        self.modules.iter().find(|m| m.specifier == specifier)
    }

    /// First 16 hex characters of SHA-256 over the unit text.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.unit_text.as_bytes());
        format!("{:x}", hash)[..16].to_owned()
    }
}

/// Inputs to the bundler.
pub struct BundleInput<'a> {
    pub plan_file: &'a str,
    /// Plan source after extraction.
    pub plan_source: &'a str,
    pub registry: &'a Registry,
    /// Host-registered modules, specifier to source.
    pub extra_modules: &'a BTreeMap<String, String>,
    /// The plan as authored. Its imports are checked for use against this
    /// module, since extraction removes uses inside `expr`/`pred` fields.
    pub original_plan: Option<(&'a SourceFile, &'a Module)>,
}

struct Loader<'a> {
    plan_spec: String,
    original_plan: Option<(&'a SourceFile, &'a Module)>,
    /// specifier to (diagnostic file name, text)
    sources: BTreeMap<String, (String, String)>,
    visited: HashSet<String>,
    stack: Vec<String>,
    // Parallel set for O(1) cycle checks; `stack` keeps the order.
    stack_set: HashSet<String>,
    out: Vec<BundledModule>,
    warnings: Vec<Diagnostic>,
}

pub fn bundle(input: &BundleInput) -> Result<Bundle, Diagnostic> {
    let plan_spec = library::plan_specifier(input.plan_file);
    let mut sources: BTreeMap<String, (String, String)> = BTreeMap::new();
    for (spec, text) in input.extra_modules {
        sources.insert(spec.clone(), (spec.clone(), text.clone()));
    }
    sources.insert(
        DSL_SPECIFIER.to_owned(),
        (DSL_SPECIFIER.to_owned(), library::DSL_SOURCE.to_owned()),
    );
    sources.insert(
        REGISTRY_SPECIFIER.to_owned(),
        (
            REGISTRY_SPECIFIER.to_owned(),
            library::registry_module(input.registry),
        ),
    );
    sources.insert(
        plan_spec.clone(),
        (input.plan_file.to_owned(), input.plan_source.to_owned()),
    );
    sources.insert(
        ENTRY_SPECIFIER.to_owned(),
        (
            ENTRY_SPECIFIER.to_owned(),
            library::entry_module(input.plan_file),
        ),
    );

    let mut loader = Loader {
        plan_spec,
        original_plan: input.original_plan,
        sources,
        visited: HashSet::new(),
        stack: Vec::new(),
        stack_set: HashSet::new(),
        out: Vec::new(),
        warnings: Vec::new(),
    };
    loader.load(ENTRY_SPECIFIER)?;

    let mut unit_text = String::new();
    for m in &loader.out {
        unit_text.push_str("// module: ");
        unit_text.push_str(&m.specifier);
        unit_text.push('\n');
        unit_text.push_str(&m.source.text);
        if !m.source.text.ends_with('\n') {
            unit_text.push('\n');
        }
    }

    for w in &loader.warnings {
        warn!(file = %w.file, line = w.line, column = w.column, "{}", w.message);
    }

    Ok(Bundle {
        modules: loader.out,
        warnings: loader.warnings,
        unit_text,
    })
}

impl Loader<'_> {
    fn load(&mut self, specifier: &str) -> Result<(), Diagnostic> {
        if self.visited.contains(specifier) {
            return Ok(());
        }
        let Some((file_name, text)) = self.sources.get(specifier).cloned() else {
            // Resolution is checked at the import site before recursing.
            return Err(Diagnostic::new(
                specifier,
                1,
                1,
                format!("cannot resolve module '{}'", specifier),
            ));
        };
        let source = SourceFile::new(&file_name, text);
        let module = parser::parse(&source)?;

        self.stack.push(specifier.to_owned());
        self.stack_set.insert(specifier.to_owned());

        for item in &module.items {
            let Item::Import {
                specifier: target,
                clause,
                span,
            } = item
            else {
                continue;
            };
            self.check_resolvable(target, &source, *span)?;

            if self.stack_set.contains(target.as_str()) {
                return Err(source
                    .diagnostic(
                        *span,
                        format!(
                            "import cycle detected: {} \u{2192} {}",
                            self.stack.join(" \u{2192} "),
                            target
                        ),
                    )
                    .with_hint("move the shared code into a module that neither side imports"));
            }
            self.load(target)?;
            self.check_named_imports(target, clause, *span, &source)?;
        }

        let unused = match self.original_plan {
            Some((original, authored)) if specifier == self.plan_spec => {
                unused_imports(authored, original)
            }
            _ => unused_imports(&module, &source),
        };
        self.warnings.extend(unused);

        self.stack.pop();
        self.stack_set.remove(specifier);
        self.visited.insert(specifier.to_owned());
        self.out.push(BundledModule {
            specifier: specifier.to_owned(),
            source,
            module,
        });
        Ok(())
    }

    fn check_resolvable(
        &self,
        target: &str,
        source: &SourceFile,
        span: Span,
    ) -> Result<(), Diagnostic> {
        if target.starts_with("node:") || HOST_MODULES.contains(&target) {
            return Err(source
                .diagnostic(
                    span,
                    format!("import of host module '{}' is not allowed", target),
                )
                .with_hint("plans run without file system, process or network access"));
        }
        if target.starts_with("./") || target.starts_with("../") || target.starts_with('/') {
            return Err(source
                .diagnostic(
                    span,
                    format!("relative import '{}' is not supported", target),
                )
                .with_hint("register shared plan code with the compiler as a named module"));
        }
        if !self.sources.contains_key(target) || target == ENTRY_SPECIFIER {
            let available: Vec<&str> = self
                .sources
                .keys()
                .map(String::as_str)
                .filter(|s| *s != ENTRY_SPECIFIER && !s.starts_with("plan:"))
                .collect();
            return Err(source
                .diagnostic(span, format!("cannot resolve import '{}'", target))
                .with_hint(format!("available modules: {}", available.join(", "))));
        }
        Ok(())
    }

    fn check_named_imports(
        &self,
        target: &str,
        clause: &ImportClause,
        import_span: Span,
        source: &SourceFile,
    ) -> Result<(), Diagnostic> {
        let Some(loaded) = self.out.iter().find(|m| m.specifier == target) else {
            return Ok(());
        };
        let exports = loaded.module.export_names();
        let missing = |name: &str, span: Span| {
            let d = source.diagnostic(
                span,
                format!("module '{}' has no export named '{}'", target, name),
            );
            match exports
                .iter()
                .filter(|e| edit_distance(e, name) <= 2)
                .min_by_key(|e| edit_distance(e, name))
            {
                Some(s) => d.with_hint(format!("did you mean '{}'?", s)),
                None => d,
            }
        };
        match clause {
            ImportClause::Named(names) => {
                for n in names {
                    if !exports.contains(&n.imported) {
                        return Err(missing(&n.imported, n.span));
                    }
                }
            }
            ImportClause::Default(_) => {
                if !exports.iter().any(|e| e == "default") {
                    return Err(missing("default", import_span));
                }
            }
            ImportClause::Namespace(_) => {}
        }
        Ok(())
    }
}

/// Imported bindings that no identifier in the module refers to.
fn unused_imports(module: &Module, source: &SourceFile) -> Vec<Diagnostic> {
    let mut used: HashSet<&str> = HashSet::new();
    ast::walk_module(module, &mut |e| {
        match &e.kind {
            ExprKind::Ident(name) => {
                used.insert(name.as_str());
            }
            ExprKind::Object(props) => {
                for p in props {
                    if let Property::Shorthand { name, .. } = p {
                        used.insert(name.as_str());
                    }
                }
            }
            _ => {}
        }
        true
    });

    let mut warnings = Vec::new();
    for item in &module.items {
        let Item::Import { clause, span, .. } = item else {
            continue;
        };
        let locals: Vec<(&str, Span)> = match clause {
            ImportClause::Named(names) => {
                names.iter().map(|n| (n.local.as_str(), n.span)).collect()
            }
            ImportClause::Default(local) | ImportClause::Namespace(local) => {
                vec![(local.as_str(), *span)]
            }
        };
        for (local, at) in locals {
            if !used.contains(local) {
                warnings.push(
                    source.diagnostic(at, format!("'{}' is imported but never used", local)),
                );
            }
        }
    }
    warnings
}
