/// Errors raised by the post-validation passes. Every variant is a hard
/// rejection of the artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("'capabilities_required' must be sorted lexicographically ('{prev}' precedes '{next}')")]
    UnsortedCapabilities { prev: String, next: String },

    #[error("'capabilities_required' contains duplicate: {0}")]
    DuplicateCapability(String),

    #[error("capability '{0}' is not supported by this engine version")]
    UnsupportedCapability(String),

    #[error("capability '{0}' is blocked")]
    BlockedCapability(String),

    #[error("plan extension key '{0}' not in capabilities_required")]
    ExtensionNotRequired(String),

    #[error("node '{node_id}' extension key '{key}' requires plan capability '{key}'")]
    NodeExtensionNotRequired { node_id: String, key: String },

    #[error("capability '{cap}' at {scope}: {message}")]
    InvalidPayload {
        cap: String,
        scope: String,
        message: String,
    },

    #[error("capability '{0}' has required fields but no extensions entry")]
    MissingPayload(String),

    #[error("node '{node_id}': unknown op '{op}'")]
    UnknownOp { node_id: String, op: String },

    #[error("node '{node_id}' references unknown node '{input}'")]
    UnknownNode { node_id: String, input: String },

    #[error("node '{node_id}' ({op}) requires provably identical write sets on every input: {message}")]
    StrictShape {
        node_id: String,
        op: String,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}
