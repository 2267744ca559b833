use super::Parser;
use crate::ast::{
    DeclKind, Function, FunctionBody, ImportClause, ImportName, Item, Pattern, Stmt, StmtKind,
};
use crate::error::Diagnostic;
use crate::lexer::Token;

impl<'a> Parser<'a> {
    // -- Module items -------------------------------------------

    pub(super) fn parse_item(&mut self) -> Result<Item, Diagnostic> {
        if self.is_word("import") && !matches!(self.peek_nth(1), Token::LParen | Token::Dot) {
            return self.parse_import();
        }
        if self.is_word("export") {
            return self.parse_export();
        }
        Ok(Item::Stmt(self.parse_stmt()?))
    }

    fn parse_import(&mut self) -> Result<Item, Diagnostic> {
        let start = self.expect_word("import")?.start;

        // `import "x";`
        if let Token::Str(_) = self.peek() {
            let (specifier, _) = self.take_str()?;
            self.consume_semi()?;
            return Ok(Item::Import {
                specifier,
                clause: ImportClause::Named(Vec::new()),
                span: self.span_from(start),
            });
        }

        let clause = match self.peek() {
            Token::Star => {
                self.advance();
                self.expect_word("as")?;
                let (local, _) = self.take_ident()?;
                ImportClause::Namespace(local)
            }
            Token::LBrace => {
                self.advance();
                let mut names = Vec::new();
                while self.peek() != &Token::RBrace {
                    let (imported, span) = self.take_property_name()?;
                    let local = if self.is_word("as") {
                        self.advance();
                        self.take_ident()?.0
                    } else {
                        imported.clone()
                    };
                    names.push(ImportName {
                        imported,
                        local,
                        span: self.span_from(span.start),
                    });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                ImportClause::Named(names)
            }
            Token::Word(_) => {
                let (local, _) = self.take_ident()?;
                if self.peek() == &Token::Comma {
                    return Err(self
                        .err("combined default and named imports are not supported")
                        .with_hint("split them into two import statements"));
                }
                ImportClause::Default(local)
            }
            _ => return Err(self.unexpected("import clause")),
        };
        self.expect_word("from")?;
        let (specifier, _) = self.take_str()?;
        self.consume_semi()?;
        Ok(Item::Import {
            specifier,
            clause,
            span: self.span_from(start),
        })
    }

    fn parse_export(&mut self) -> Result<Item, Diagnostic> {
        self.expect_word("export")?;
        if self.is_word("default") {
            self.advance();
            let expr = self.parse_expr()?;
            self.consume_semi()?;
            return Ok(Item::ExportDefault(expr));
        }
        if self.is_word("const") || self.is_word("let") || self.is_word("function") {
            return Ok(Item::Export(self.parse_stmt()?));
        }
        self.reject_unsupported_word()?;
        Err(self
            .unexpected("'const', 'let', 'function' or 'default' after export")
            .with_hint("export declarations directly; export lists are not supported"))
    }

    fn reject_unsupported_word(&self) -> Result<(), Diagnostic> {
        if let Token::Word(w) = self.peek() {
            self.reject_unsupported(w)?;
        }
        Ok(())
    }

    // -- Statements ---------------------------------------------

    pub(super) fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        self.enter()?;
        let stmt = self.parse_stmt_inner();
        self.leave();
        stmt
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.cur().span.start;
        let kind = match self.peek().clone() {
            Token::Semi => {
                self.advance();
                StmtKind::Empty
            }
            Token::LBrace => StmtKind::Block(self.parse_block()?),
            Token::Word(w) => match w.as_str() {
                "const" | "let" => {
                    let kind = self.parse_decl_kind()?;
                    let mut decls = Vec::new();
                    loop {
                        let pattern = self.parse_pattern()?;
                        let init = if self.eat(&Token::Assign) {
                            Some(self.parse_expr()?)
                        } else {
                            None
                        };
                        if init.is_none() && kind == DeclKind::Const {
                            return Err(self.err("missing initializer in const declaration"));
                        }
                        decls.push((pattern, init));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.consume_semi()?;
                    StmtKind::Decl { kind, decls }
                }
                "function" => {
                    let func = self.parse_function_decl()?;
                    if func.name.is_none() {
                        return Err(self.err_at(func.span, "function declarations need a name"));
                    }
                    StmtKind::Function(func)
                }
                "return" => {
                    self.advance();
                    let cur = self.cur();
                    let value = if cur.newline_before
                        || matches!(cur.token, Token::Semi | Token::RBrace | Token::Eof)
                    {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.consume_semi()?;
                    StmtKind::Return(value)
                }
                "if" => {
                    self.advance();
                    self.expect(&Token::LParen)?;
                    let test = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    let then = Box::new(self.parse_stmt()?);
                    let otherwise = if self.is_word("else") {
                        self.advance();
                        Some(Box::new(self.parse_stmt()?))
                    } else {
                        None
                    };
                    StmtKind::If {
                        test,
                        then,
                        otherwise,
                    }
                }
                "for" => {
                    self.advance();
                    self.expect(&Token::LParen)?;
                    if !(self.is_word("const") || self.is_word("let")) {
                        return Err(self
                            .err("only 'for (const x of xs)' loops are supported")
                            .with_hint("iterate arrays with for…of or .map/.forEach"));
                    }
                    let kind = self.parse_decl_kind()?;
                    let pattern = self.parse_pattern()?;
                    if !self.is_word("of") {
                        return Err(self
                            .err("only 'for (const x of xs)' loops are supported")
                            .with_hint("iterate arrays with for…of or .map/.forEach"));
                    }
                    self.advance();
                    let iterable = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    let body = Box::new(self.parse_stmt()?);
                    StmtKind::ForOf {
                        kind,
                        pattern,
                        iterable,
                        body,
                    }
                }
                "throw" => {
                    self.advance();
                    if self.cur().newline_before {
                        return Err(self.err("line break is not allowed after 'throw'"));
                    }
                    let value = self.parse_expr()?;
                    self.consume_semi()?;
                    StmtKind::Throw(value)
                }
                "import" | "export" => {
                    return Err(self.err(format!("'{}' is only allowed at the top level", w)))
                }
                other => {
                    self.reject_unsupported(other)?;
                    let expr = self.parse_expr()?;
                    self.consume_semi()?;
                    StmtKind::Expr(expr)
                }
            },
            _ => {
                let expr = self.parse_expr()?;
                self.consume_semi()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_decl_kind(&mut self) -> Result<DeclKind, Diagnostic> {
        if self.is_word("const") {
            self.advance();
            Ok(DeclKind::Const)
        } else {
            self.expect_word("let")?;
            Ok(DeclKind::Let)
        }
    }

    pub(super) fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek() != &Token::RBrace {
            if self.peek() == &Token::Eof {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    pub(super) fn parse_pattern(&mut self) -> Result<Pattern, Diagnostic> {
        if self.peek() != &Token::LBrace {
            return Ok(Pattern::Ident(self.take_ident()?.0));
        }
        self.advance();
        let mut props = Vec::new();
        while self.peek() != &Token::RBrace {
            if self.peek() == &Token::Ellipsis {
                return Err(self.err("rest elements in destructuring are not supported"));
            }
            let (key, _) = self.take_property_name()?;
            let local = if self.eat(&Token::Colon) {
                self.take_ident()?.0
            } else {
                if super::RESERVED.contains(&key.as_str()) {
                    return Err(self.err(format!("'{}' is a reserved word", key)));
                }
                key.clone()
            };
            if self.peek() == &Token::Assign {
                return Err(self.err("default values in destructuring are not supported"));
            }
            props.push((key, local));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Pattern::Object(props))
    }

    /// `function name(a, b) { … }`; the name is optional in expression
    /// position.
    pub(super) fn parse_function_decl(&mut self) -> Result<Function, Diagnostic> {
        let start = self.expect_word("function")?.start;
        if self.peek() == &Token::Star {
            return Err(self.err("generators are not supported"));
        }
        let name = match self.peek() {
            Token::Word(_) => Some(self.take_ident()?.0),
            _ => None,
        };
        let params = self.parse_params()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(Function {
            name,
            params,
            body,
            span: self.span_from(start),
        })
    }

    pub(super) fn parse_params(&mut self) -> Result<Vec<Pattern>, Diagnostic> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            if self.peek() == &Token::Ellipsis {
                return Err(self.err("rest parameters are not supported"));
            }
            params.push(self.parse_pattern()?);
            if self.peek() == &Token::Assign {
                return Err(self.err("default parameter values are not supported"));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }
}
