//! Shared library sources bundled with every plan.
//!
//! `@rankplan/dsl` is embedded PlanScript. `@rankplan/registry` and the
//! entry module are generated per compile.

use rankplan_ir::Registry;

pub const DSL_SPECIFIER: &str = "@rankplan/dsl";
pub const REGISTRY_SPECIFIER: &str = "@rankplan/registry";
pub const ENTRY_SPECIFIER: &str = "<entry>";

/// Specifier under which the rewritten plan module is bundled.
pub fn plan_specifier(file_name: &str) -> String {
    format!("plan:{}", file_name)
}

pub const DSL_SOURCE: &str = include_str!("../lib/dsl.js");

fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Source of `@rankplan/registry`: `Key` and `P` objects of
/// `{ kind, id, name }` records.
pub fn registry_module(registry: &Registry) -> String {
    let mut out = String::from("export const Key = {\n");
    for (name, id) in registry.keys() {
        out.push_str(&format!(
            "  {}: {{ kind: \"key\", id: {}, name: {} }},\n",
            name,
            id,
            string_literal(name)
        ));
    }
    out.push_str("};\n\nexport const P = {\n");
    for (name, id) in registry.params() {
        out.push_str(&format!(
            "  {}: {{ kind: \"param\", id: {}, name: {} }},\n",
            name,
            id,
            string_literal(name)
        ));
    }
    out.push_str("};\n");
    out
}

/// The synthesized entry: run the plan's default export.
pub fn entry_module(plan_file: &str) -> String {
    format!(
        "import * as plan from {};\nimport {{ __runPlan }} from {};\n__runPlan(plan.default);\n",
        string_literal(&plan_specifier(plan_file)),
        string_literal(DSL_SPECIFIER)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::source::SourceFile;
    use rankplan_ir::RegistryEntry;

    #[test]
    fn generated_modules_parse() {
        let registry = Registry::new(
            vec![RegistryEntry {
                name: "final_score".to_owned(),
                id: 7,
            }],
            vec![],
        )
        .unwrap();
        let text = registry_module(&registry);
        assert!(text.contains("final_score: { kind: \"key\", id: 7, name: \"final_score\" },"));
        let m = parser::parse(&SourceFile::new(REGISTRY_SPECIFIER, text)).unwrap();
        assert_eq!(m.export_names(), vec!["Key".to_owned(), "P".to_owned()]);

        let entry = entry_module("a \"b\".plan.js");
        assert!(entry.starts_with("import * as plan from \"plan:a \\\"b\\\".plan.js\";"));
        parser::parse(&SourceFile::new(ENTRY_SPECIFIER, entry)).unwrap();
    }

    #[test]
    fn dsl_source_parses_and_exports_the_surface() {
        let m = parser::parse(&SourceFile::new(DSL_SPECIFIER, DSL_SOURCE)).unwrap();
        let names = m.export_names();
        for expected in ["definePlan", "E", "Pr", "coalesce", "regex", "__runPlan"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }
}
