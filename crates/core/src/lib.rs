#![allow(clippy::result_large_err)]
//! rankplan-core: the rankplan plan compiler.
//!
//! Compiles a PlanScript plan file into a portable, validated ranking-plan
//! artifact. The pipeline is a chain of passes over in-memory sources:
//!
//! - [`parser`] -- PlanScript lexing and parsing into the [`ast`]
//! - [`pass1_extract`] -- natural `expr`/`pred` syntax compiled to IR and
//!   replaced by placeholders
//! - [`pass2_bundle`] -- import resolution against virtual modules
//! - [`pass3_execute`] -- sandboxed evaluation; exactly one emitted value
//! - [`pass4_assemble`] -- schema, naming and structural validation, table
//!   merge, provenance
//! - [`pass5_analyze`] -- capability governance and key effects
//!
//! [`compile()`] and [`Compiler`] run the whole pipeline.

pub mod ast;
pub mod compile;
pub mod config;
pub mod error;
pub mod lexer;
pub mod library;
pub mod parser;
pub mod pass1_extract;
pub mod pass2_bundle;
pub mod pass3_execute;
pub mod pass4_assemble;
pub mod pass5_analyze;
pub mod source;

// ── Convenience re-exports ───────────────────────────────────────────

pub use compile::{compile, CompileOutput, Compiler};
pub use config::{CompilerConfig, ConfigError, Provenance, SandboxLimits};
pub use error::{CompileError, Diagnostic};
pub use source::SourceFile;

pub use rankplan_analyze::{CapabilityRegistry, PlanInfo, TaskCatalog};
pub use rankplan_ir::{PlanArtifact, Registry};
