use serde::{Deserialize, Serialize};
use std::fmt;

/// A located compiler message. Lines and columns are 1-based; columns count
/// characters, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(file: &str, line: u32, column: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.to_owned(),
            line,
            column,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "file":    self.file,
            "line":    self.line,
            "column":  self.column,
            "message": self.message,
            "hint":    self.hint,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

fn join(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A failed compile. No artifact is produced for any variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Malformed authoring text or an unresolvable import; raised while
    /// bundling.
    #[error("syntax error: {0}")]
    Syntax(Diagnostic),

    /// Natural expressions or predicates outside the supported grammar,
    /// accumulated over the whole file.
    #[error("{} extraction error(s):\n{}", .0.len(), join(.0))]
    Extraction(Vec<Diagnostic>),

    /// Sandbox policy violation, emit count, or an unserializable value.
    #[error("execution error: {0}")]
    Execution(Diagnostic),

    /// The emitted artifact failed schema, naming, structural or capability
    /// validation.
    #[error("{} validation error(s):\n{}", .0.len(), join(.0))]
    Validation(Vec<Diagnostic>),
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Syntax(_) => "syntax",
            CompileError::Extraction(_) => "extraction",
            CompileError::Execution(_) => "execution",
            CompileError::Validation(_) => "validation",
        }
    }

    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        match self {
            CompileError::Syntax(d) | CompileError::Execution(d) => vec![d],
            CompileError::Extraction(ds) | CompileError::Validation(ds) => ds.iter().collect(),
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "diagnostics": self
                .diagnostics()
                .into_iter()
                .map(Diagnostic::to_json_value)
                .collect::<Vec<_>>(),
        })
    }
}
