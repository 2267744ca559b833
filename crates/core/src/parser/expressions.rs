use super::Parser;
use crate::ast::{
    ArrayItem, BinaryOp, Expr, ExprKind, Function, FunctionBody, LogicalOp, Pattern, Property,
    Span, UnaryOp,
};
use crate::error::Diagnostic;
use crate::lexer::Token;

impl<'a> Parser<'a> {
    // -- Expression parsing --------------------------------------

    pub(super) fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.enter()?;
        let e = self.parse_assign();
        self.leave();
        e
    }

    fn parse_assign(&mut self) -> Result<Expr, Diagnostic> {
        if self.at_arrow() {
            return self.parse_arrow();
        }
        let start = self.cur().span.start;
        let target = self.parse_conditional()?;
        if self.peek() != &Token::Assign {
            return Ok(target);
        }
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(self.err_at(target.span, "invalid assignment target"));
        }
        self.advance();
        let value = self.parse_expr()?;
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            self.span_from(start),
        ))
    }

    fn parse_conditional(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.cur().span.start;
        let test = self.parse_nullish()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let then = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_expr()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            self.span_from(start),
        ))
    }

    fn logical(&self, op: LogicalOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.to(right.span);
        Expr::new(
            ExprKind::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn binary(&self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.to(right.span);
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn parse_nullish(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_or()?;
        while self.eat(&Token::QuestionQuestion) {
            let right = self.parse_or()?;
            left = self.logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = self.logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_equality()?;
            left = self.logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::EqEqEq => BinaryOp::StrictEq,
                Token::NotEq => BinaryOp::Ne,
                Token::NotEqEq => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = self.binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Lte => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Gte => BinaryOp::Ge,
                Token::Word(w) if w == "in" || w == "instanceof" => {
                    return Err(self.err(format!("'{}' is not supported in plan files", w)))
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = self.binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.cur().span.start;
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Word(w) if w == "typeof" => UnaryOp::Typeof,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let arg = self.parse_unary();
        self.leave();
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                arg: Box::new(arg?),
            },
            self.span_from(start),
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.cur().span.start;
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while self.peek() != &Token::RParen {
                        if self.peek() == &Token::Ellipsis {
                            return Err(self.err("spread arguments are not supported"));
                        }
                        args.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                Token::Dot => {
                    self.advance();
                    let (property, _) = self.take_property_name()?;
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        self.span_from(start),
                    );
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                Token::Question if self.peek_nth(1) == &Token::Dot => {
                    return Err(self
                        .err("optional chaining is not supported")
                        .with_hint("test for null explicitly"));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.cur().span.start;
        let kind = match self.peek().clone() {
            Token::Num(raw) => {
                self.advance();
                ExprKind::Number(raw)
            }
            Token::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            Token::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.parse_expr();
                self.leave();
                let inner = inner?;
                self.expect(&Token::RParen)?;
                ExprKind::Paren(Box::new(inner))
            }
            Token::LBracket => self.parse_array()?,
            Token::LBrace => self.parse_object()?,
            Token::Word(w) => match w.as_str() {
                "true" | "false" => {
                    self.advance();
                    ExprKind::Bool(w == "true")
                }
                "null" => {
                    self.advance();
                    ExprKind::Null
                }
                "undefined" => {
                    self.advance();
                    ExprKind::Undefined
                }
                "function" => ExprKind::Function(Box::new(self.parse_function_decl()?)),
                _ => {
                    self.reject_unsupported(&w)?;
                    let (name, _) = self.take_ident()?;
                    ExprKind::Ident(name)
                }
            },
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_array(&mut self) -> Result<ExprKind, Diagnostic> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        while self.peek() != &Token::RBracket {
            if self.peek() == &Token::Comma {
                return Err(self.err("array holes are not supported"));
            }
            if self.eat(&Token::Ellipsis) {
                items.push(ArrayItem::Spread(self.parse_expr()?));
            } else {
                items.push(ArrayItem::Item(self.parse_expr()?));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(ExprKind::Array(items))
    }

    fn parse_object(&mut self) -> Result<ExprKind, Diagnostic> {
        self.expect(&Token::LBrace)?;
        let mut props = Vec::new();
        while self.peek() != &Token::RBrace {
            if self.eat(&Token::Ellipsis) {
                props.push(Property::Spread(self.parse_expr()?));
            } else {
                props.push(self.parse_property()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(ExprKind::Object(props))
    }

    fn parse_property(&mut self) -> Result<Property, Diagnostic> {
        let key_span = self.cur().span;
        let key = match self.peek().clone() {
            Token::Word(w) => w,
            Token::Str(s) => s,
            Token::Num(raw) => raw,
            Token::LBracket => {
                return Err(self.err("computed property names are not supported"));
            }
            _ => return Err(self.unexpected("property name")),
        };
        let is_word = matches!(self.peek(), Token::Word(_));
        self.advance();

        match self.peek() {
            Token::Colon => {
                self.advance();
                let value = self.parse_expr()?;
                Ok(Property::KeyValue {
                    key,
                    key_span,
                    value,
                })
            }
            // Method shorthand: `build(ctx) { … }`
            Token::LParen => {
                let params = self.parse_params()?;
                let body = FunctionBody::Block(self.parse_block()?);
                let span = self.span_from(key_span.start);
                Ok(Property::KeyValue {
                    key: key.clone(),
                    key_span,
                    value: Expr::new(
                        ExprKind::Function(Box::new(Function {
                            name: Some(key),
                            params,
                            body,
                            span,
                        })),
                        span,
                    ),
                })
            }
            Token::Comma | Token::RBrace if is_word => {
                if super::RESERVED.contains(&key.as_str()) {
                    return Err(self.err_at(key_span, format!("'{}' is a reserved word", key)));
                }
                Ok(Property::Shorthand {
                    name: key,
                    span: key_span,
                })
            }
            _ => Err(self.unexpected("':'")),
        }
    }

    // -- Arrow functions -----------------------------------------

    /// Lookahead: `x =>` or a parenthesised list followed by `=>`.
    fn at_arrow(&self) -> bool {
        match self.peek() {
            Token::Word(w) if w == "async" => false,
            Token::Word(_) => self.peek_nth(1) == &Token::Arrow,
            Token::LParen => {
                let mut depth = 0usize;
                let mut i = self.pos;
                while i < self.tokens.len() {
                    match self.tokens[i].token {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return self
                                    .tokens
                                    .get(i + 1)
                                    .map_or(false, |t| t.token == Token::Arrow);
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr, Diagnostic> {
        let start = self.cur().span.start;
        let params = if self.peek() == &Token::LParen {
            self.parse_params()?
        } else {
            vec![Pattern::Ident(self.take_ident()?.0)]
        };
        if self.cur().newline_before {
            return Err(self.err("line break is not allowed before '=>'"));
        }
        self.expect(&Token::Arrow)?;
        let body = if self.peek() == &Token::LBrace {
            self.enter()?;
            let block = self.parse_block();
            self.leave();
            FunctionBody::Block(block?)
        } else {
            FunctionBody::Expr(self.parse_expr()?)
        };
        let span: Span = self.span_from(start);
        Ok(Expr::new(
            ExprKind::Function(Box::new(Function {
                name: None,
                params,
                body,
                span,
            })),
            span,
        ))
    }
}
