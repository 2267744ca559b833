//! PlanScript parser: tokens to [`Module`].
//!
//! Recursive descent over the token stream from [`crate::lexer`]. Constructs
//! outside the PlanScript subset (classes, `new`, loops other than
//! `for…of`, async code) are rejected here with a located diagnostic.
use crate::ast::{Module, Span};
use crate::error::Diagnostic;
use crate::lexer::{self, Spanned, Token};
use crate::source::SourceFile;

mod expressions;
mod statements;

/// Nesting limit for expressions and blocks.
const MAX_DEPTH: usize = 128;

/// Words that can never name a binding.
const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "var", "void", "while", "with", "yield", "async", "await", "undefined",
];

/// Keywords that lex fine but have no place in a plan file.
const UNSUPPORTED: &[(&str, &str)] = &[
    ("var", "use const or let"),
    ("class", "use plain objects and functions"),
    ("new", "use object literals and factory functions"),
    ("async", "plan code runs synchronously"),
    ("await", "plan code runs synchronously"),
    ("while", "use for (const x of xs)"),
    ("do", "use for (const x of xs)"),
    ("yield", "generators are not supported"),
    ("this", "pass values explicitly"),
    ("switch", "use if / else"),
    ("try", "errors abort the compile; there is nothing to catch"),
    ("delete", "build a new object instead"),
];

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    src: &'a SourceFile,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], src: &'a SourceFile) -> Self {
        Parser {
            tokens,
            pos: 0,
            src,
            depth: 0,
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    /// End offset of the last consumed token.
    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn err(&self, msg: impl Into<String>) -> Diagnostic {
        let cur = self.cur();
        Diagnostic::new(&self.src.name, cur.line, cur.col, msg)
    }

    fn err_at(&self, span: Span, msg: impl Into<String>) -> Diagnostic {
        self.src.diagnostic(span, msg)
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        self.err(format!(
            "expected {}, got {}",
            expected,
            self.peek().describe()
        ))
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<Span, Diagnostic> {
        if self.peek() == tok {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(&tok.describe()))
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<Span, Diagnostic> {
        if self.is_word(expected) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(&format!("'{}'", expected)))
        }
    }

    /// A binding identifier: any word that is not reserved.
    fn take_ident(&mut self) -> Result<(String, Span), Diagnostic> {
        match self.peek().clone() {
            Token::Word(w) if !RESERVED.contains(&w.as_str()) => {
                let span = self.advance().span;
                Ok((w, span))
            }
            Token::Word(w) => {
                self.reject_unsupported(&w)?;
                Err(self.err(format!("'{}' is a reserved word", w)))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Property names admit reserved words.
    fn take_property_name(&mut self) -> Result<(String, Span), Diagnostic> {
        match self.peek().clone() {
            Token::Word(w) => {
                let span = self.advance().span;
                Ok((w, span))
            }
            _ => Err(self.unexpected("property name")),
        }
    }

    fn take_str(&mut self) -> Result<(String, Span), Diagnostic> {
        match self.peek().clone() {
            Token::Str(s) => {
                let span = self.advance().span;
                Ok((s, span))
            }
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn reject_unsupported(&self, word: &str) -> Result<(), Diagnostic> {
        match UNSUPPORTED.iter().find(|(w, _)| *w == word) {
            Some((w, hint)) => Err(self
                .err(format!("'{}' is not supported in plan files", w))
                .with_hint(*hint)),
            None => Ok(()),
        }
    }

    /// Statement terminator with automatic semicolon insertion: an explicit
    /// `;`, a closing brace, end of input, or a line break.
    fn consume_semi(&mut self) -> Result<(), Diagnostic> {
        if self.eat(&Token::Semi) {
            return Ok(());
        }
        let cur = self.cur();
        if matches!(cur.token, Token::RBrace | Token::Eof) || cur.newline_before {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    fn enter(&mut self) -> Result<(), Diagnostic> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.err(format!("nesting exceeds {} levels", MAX_DEPTH)));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_module(&mut self) -> Result<Module, Diagnostic> {
        let mut items = Vec::new();
        while self.peek() != &Token::Eof {
            items.push(self.parse_item()?);
        }
        Ok(Module { items })
    }
}

/// Lex and parse one source file.
pub fn parse(src: &SourceFile) -> Result<Module, Diagnostic> {
    let tokens = lexer::lex(src)?;
    let mut p = Parser::new(&tokens, src);
    p.parse_module()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprKind, ImportClause, Item, Pattern, Property, StmtKind};

    fn parse_ok(text: &str) -> Module {
        parse(&SourceFile::new("t.plan.js", text)).unwrap()
    }

    fn parse_err(text: &str) -> Diagnostic {
        parse(&SourceFile::new("t.plan.js", text)).unwrap_err()
    }

    #[test]
    fn imports_in_all_three_forms() {
        let m = parse_ok(
            "import { definePlan, Key as K } from \"@rankplan/dsl\";\n\
             import reg from \"@rankplan/registry\"\n\
             import * as lib from \"lib/util\";",
        );
        assert_eq!(m.items.len(), 3);
        match &m.items[0] {
            Item::Import {
                specifier,
                clause: ImportClause::Named(names),
                ..
            } => {
                assert_eq!(specifier, "@rankplan/dsl");
                assert_eq!(names[1].imported, "Key");
                assert_eq!(names[1].local, "K");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &m.items[1],
            Item::Import { clause: ImportClause::Default(n), .. } if n == "reg"
        ));
        assert!(matches!(
            &m.items[2],
            Item::Import { clause: ImportClause::Namespace(n), .. } if n == "lib"
        ));
    }

    #[test]
    fn export_default_call_with_method_shorthand() {
        let m = parse_ok(
            "export default definePlan({\n  name: \"demo\",\n  build(ctx) { return ctx.viewer.follow({}); },\n});",
        );
        let Item::ExportDefault(e) = &m.items[0] else {
            panic!("expected export default");
        };
        let ExprKind::Call { args, .. } = &e.kind else {
            panic!("expected call");
        };
        let ExprKind::Object(props) = &args[0].kind else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 2);
        match &props[1] {
            Property::KeyValue { key, value, .. } => {
                assert_eq!(key, "build");
                assert!(matches!(value.kind, ExprKind::Function(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.export_names(), vec!["default".to_owned()]);
    }

    #[test]
    fn precedence_of_arithmetic_and_logic() {
        let m = parse_ok("x = a + b * c > 1 && !d || e ?? f;");
        let Item::Stmt(stmt) = &m.items[0] else {
            panic!()
        };
        let StmtKind::Expr(e) = &stmt.kind else {
            panic!()
        };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!()
        };
        // ?? binds loosest
        assert!(matches!(
            value.kind,
            ExprKind::Logical {
                op: crate::ast::LogicalOp::Nullish,
                ..
            }
        ));
    }

    #[test]
    fn arrow_functions_and_destructuring() {
        let m = parse_ok(
            "const f = (a, { b, c: d }) => a + b + d;\nconst g = x => x;\nconst h = () => { return 1 }",
        );
        let Item::Stmt(stmt) = &m.items[0] else {
            panic!()
        };
        let StmtKind::Decl { decls, .. } = &stmt.kind else {
            panic!()
        };
        let Some(init) = &decls[0].1 else { panic!() };
        let ExprKind::Function(f) = &init.kind else {
            panic!()
        };
        assert_eq!(f.params.len(), 2);
        assert_eq!(
            f.params[1],
            Pattern::Object(vec![
                ("b".to_owned(), "b".to_owned()),
                ("c".to_owned(), "d".to_owned())
            ])
        );
        assert_eq!(m.items.len(), 3);
    }

    #[test]
    fn spans_cover_source_text() {
        let src = SourceFile::new("t.plan.js", "const v = (Key.a + 1) * P.w;");
        let m = parse(&src).unwrap();
        let Item::Stmt(stmt) = &m.items[0] else {
            panic!()
        };
        let StmtKind::Decl { decls, .. } = &stmt.kind else {
            panic!()
        };
        let init = decls[0].1.as_ref().unwrap();
        assert_eq!(src.slice(init.span), "(Key.a + 1) * P.w");
    }

    #[test]
    fn automatic_semicolons_need_a_line_break() {
        parse_ok("const a = 1\nconst b = 2\n");
        let err = parse_err("const a = 1 const b = 2");
        assert!(err.message.contains("expected ';'"), "{}", err.message);
    }

    #[test]
    fn unsupported_keywords_have_hints() {
        let err = parse_err("var x = 1;");
        assert_eq!(err.message, "'var' is not supported in plan files");
        assert_eq!(err.hint.as_deref(), Some("use const or let"));

        let err = parse_err("const o = new Thing();");
        assert!(err.message.contains("'new'"));
        assert_eq!((err.line, err.column), (1, 11));

        let err = parse_err("while (true) {}");
        assert!(err.message.contains("'while'"));
    }

    #[test]
    fn for_of_and_if_else() {
        let m = parse_ok(
            "function f(xs) {\n  for (const x of xs) { if (x > 1) { return x } else return 0 }\n}",
        );
        assert_eq!(m.items.len(), 1);
        let Item::Stmt(stmt) = &m.items[0] else {
            panic!()
        };
        let StmtKind::Function(f) = &stmt.kind else {
            panic!()
        };
        assert_eq!(f.name.as_deref(), Some("f"));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let text = format!("const x = {}1{};", "(".repeat(400), ")".repeat(400));
        let err = parse_err(&text);
        assert!(err.message.contains("nesting exceeds"));
    }
}
