/// Errors raised while loading or validating artifact documents.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// The embedded artifact schema failed to parse or compile.
    #[error("internal error: embedded artifact schema is invalid: {0}")]
    Schema(String),

    /// The document does not conform to the artifact schema.
    #[error("artifact does not conform to schema: {}", .0.join("; "))]
    Nonconforming(Vec<String>),

    /// The document conforms to the schema but could not be mapped to typed
    /// structs (or a typed struct could not be turned back into JSON).
    #[error("malformed artifact: {0}")]
    Malformed(#[from] serde_json::Error),
}
