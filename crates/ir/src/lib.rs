//! rankplan-ir: shared plan artifact model.
//!
//! Everything that both the compiler and a consuming execution engine need
//! to agree on lives here, so that artifacts are interchangeable regardless
//! of which implementation produced them:
//!
//! - [`ExprNode`] / [`PredNode`] -- the typed expression and predicate IR
//! - [`PlanArtifact`] -- the artifact document, with [`PlanArtifact::from_json`]
//!   running the shared schema validator before deserializing
//! - [`ArtifactValidator`] -- the embedded JSON Schema, compiled once per use
//! - [`canonical`] -- canonical JSON serialization used for digests and output
//! - [`Registry`] -- the injected, read-only key/parameter name tables
//! - [`eval`] -- a reference evaluator for the IR over a single row

/// Artifact schema version emitted by this release.
pub const SCHEMA_VERSION: u32 = 1;

pub mod canonical;
pub mod error;
pub mod eval;
pub mod registry;
pub mod schema;
pub mod types;

pub use error::IrError;
pub use registry::{Registry, RegistryEntry, RegistryError};
pub use schema::ArtifactValidator;
pub use types::*;
