//! Source text with a line index for turning byte offsets into locations.

use crate::ast::Span;
use crate::error::Diagnostic;

/// One named source unit: the plan file, a library module, or the
/// synthesized entry.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        SourceFile {
            name: name.to_owned(),
            text,
            line_starts,
        }
    }

    /// 1-based line and character column of a byte offset.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line_idx];
        let col = self
            .text
            .get(start..offset)
            .map_or(offset - start, |s| s.chars().count());
        (line_idx as u32 + 1, col as u32 + 1)
    }

    pub fn diagnostic(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        let (line, column) = self.line_col(span.start);
        Diagnostic::new(&self.name, line, column, message)
    }

    pub fn slice(&self, span: Span) -> &str {
        self.text.get(span.start..span.end).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_is_one_based() {
        let f = SourceFile::new("t.js", "ab\ncd\n\nef");
        assert_eq!(f.line_col(0), (1, 1));
        assert_eq!(f.line_col(1), (1, 2));
        assert_eq!(f.line_col(3), (2, 1));
        assert_eq!(f.line_col(7), (4, 1));
        assert_eq!(f.line_col(99), (4, 3));
    }

    #[test]
    fn columns_count_characters() {
        let f = SourceFile::new("t.js", "é = 1");
        // 'é' is two bytes
        assert_eq!(f.line_col(3), (1, 3));
    }

    #[test]
    fn diagnostic_uses_span_start() {
        let f = SourceFile::new("t.js", "x\n  y / z");
        let d = f.diagnostic(Span::new(4, 9), "nope");
        assert_eq!((d.line, d.column), (2, 3));
        assert_eq!(d.file, "t.js");
    }
}
