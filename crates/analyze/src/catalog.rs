//! Task catalog: the write-effect contract of every op a plan may use.

use crate::writes_effect::{EnumDomains, WritesEffectExpr};
use std::collections::BTreeMap;

/// Static description of one task kind.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Keys the task always writes.
    pub writes: Vec<u32>,
    /// Param-dependent writes.
    pub writes_effect: Option<WritesEffectExpr>,
    pub enum_domains: EnumDomains,
    /// Inputs must be provably shape-identical.
    pub strict_shape: bool,
}

impl TaskSpec {
    pub fn writes_nothing() -> Self {
        TaskSpec {
            writes: vec![],
            writes_effect: None,
            enum_domains: EnumDomains::new(),
            strict_shape: false,
        }
    }

    pub fn with_effect(effect: WritesEffectExpr) -> Self {
        TaskSpec {
            writes_effect: Some(effect),
            ..TaskSpec::writes_nothing()
        }
    }

    pub fn with_domain(mut self, param: &str, values: &[&str]) -> Self {
        self.enum_domains.insert(
            param.to_owned(),
            values.iter().map(|v| (*v).to_owned()).collect(),
        );
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_shape = true;
        self
    }

    /// `Keys(writes)`, `writes_effect`, or their union when both are given.
    pub fn effective_writes(&self) -> WritesEffectExpr {
        match (&self.writes_effect, self.writes.is_empty()) {
            (None, _) => WritesEffectExpr::keys(self.writes.iter().copied()),
            (Some(effect), true) => effect.clone(),
            (Some(effect), false) => WritesEffectExpr::union(vec![
                WritesEffectExpr::keys(self.writes.iter().copied()),
                effect.clone(),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: BTreeMap<String, TaskSpec>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        TaskCatalog::default()
    }

    /// Every op the plan-builder library emits.
    pub fn standard() -> Self {
        let mut catalog = TaskCatalog::new();
        for op in [
            "viewer.follow",
            "viewer.fetch_cached_recommendation",
            "core::filter",
            "core::take",
            "core::sort",
            "core::concat",
        ] {
            catalog.register(op, TaskSpec::writes_nothing());
        }
        catalog.register("core::vm", TaskSpec::with_effect(WritesEffectExpr::from_param("out_key")));
        catalog.register(
            "core::stage_score",
            TaskSpec::with_effect(WritesEffectExpr::switch_enum(
                "stage",
                [
                    ("esr", WritesEffectExpr::from_param("esr_key")),
                    ("lsr", WritesEffectExpr::from_param("lsr_key")),
                ],
            ))
            .with_domain("stage", &["esr", "lsr"]),
        );
        catalog.register("core::fallback", TaskSpec::writes_nothing().strict());
        catalog.register("core::branch", TaskSpec::writes_nothing().strict());
        catalog
    }

    pub fn register(&mut self, op: &str, spec: TaskSpec) {
        self.tasks.insert(op.to_owned(), spec);
    }

    pub fn get(&self, op: &str) -> Option<&TaskSpec> {
        self.tasks.get(op)
    }

    pub fn ops(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}
