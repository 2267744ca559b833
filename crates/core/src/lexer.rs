use crate::ast::Span;
use crate::error::Diagnostic;
use crate::source::SourceFile;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords, distinguished in the parser
    Word(String),
    /// String literal (content without quotes, escapes resolved)
    Str(String),
    /// Numeric literal, raw text
    Num(String),
    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Semi,
    Colon,
    Dot,
    Ellipsis,
    Question,
    QuestionQuestion,
    Arrow,
    // Operators
    Assign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    // End of input
    Eof,
}

impl Token {
    /// Display form used in "expected X, got Y" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::Str(_) => "string literal".to_owned(),
            Token::Num(n) => format!("number {}", n),
            Token::Eof => "end of input".to_owned(),
            other => format!("'{}'", other.punct()),
        }
    }

    fn punct(&self) -> &'static str {
        match self {
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Ellipsis => "...",
            Token::Question => "?",
            Token::QuestionQuestion => "??",
            Token::Arrow => "=>",
            Token::Assign => "=",
            Token::EqEq => "==",
            Token::EqEqEq => "===",
            Token::NotEq => "!=",
            Token::NotEqEq => "!==",
            Token::Lt => "<",
            Token::Lte => "<=",
            Token::Gt => ">",
            Token::Gte => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Word(_) | Token::Str(_) | Token::Num(_) | Token::Eof => "",
        }
    }

    /// True if a `/` after this token would be division rather than the
    /// start of a regex literal.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Word(_)
                | Token::Str(_)
                | Token::Num(_)
                | Token::RParen
                | Token::RBracket
                | Token::RBrace
        )
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
    pub line: u32,
    pub col: u32,
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

// Longest first.
const PUNCTUATORS: &[(&str, Token)] = &[
    ("...", Token::Ellipsis),
    ("===", Token::EqEqEq),
    ("!==", Token::NotEqEq),
    ("=>", Token::Arrow),
    ("==", Token::EqEq),
    ("!=", Token::NotEq),
    ("<=", Token::Lte),
    (">=", Token::Gte),
    ("&&", Token::AndAnd),
    ("||", Token::OrOr),
    ("??", Token::QuestionQuestion),
    ("{", Token::LBrace),
    ("}", Token::RBrace),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    ("(", Token::LParen),
    (")", Token::RParen),
    (",", Token::Comma),
    (";", Token::Semi),
    (":", Token::Colon),
    (".", Token::Dot),
    ("?", Token::Question),
    ("=", Token::Assign),
    ("<", Token::Lt),
    (">", Token::Gt),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("!", Token::Bang),
];

struct Lexer<'a> {
    src: &'a SourceFile,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    fn err(&self, at: usize, msg: impl Into<String>) -> Diagnostic {
        self.src.diagnostic(Span::new(at, at), msg)
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn col_of(&self, at: usize) -> u32 {
        self.src.text[self.line_start..at].chars().count() as u32 + 1
    }

    fn newline(&mut self) {
        self.line += 1;
        self.line_start = self.pos;
    }

    /// Skip whitespace and comments; returns whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, Diagnostic> {
        let mut saw_newline = false;
        loop {
            match self.peek_at(0) {
                Some(b'\n') => {
                    self.pos += 1;
                    self.newline();
                    saw_newline = true;
                }
                Some(b' ' | b'\t' | b'\r') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek_at(0) {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek_at(0) {
                            None => return Err(self.err(start, "unterminated block comment")),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                self.pos += 1;
                                self.newline();
                                saw_newline = true;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                Some(_) => {
                    // Non-ASCII whitespace (NBSP, BOM, ...)
                    let c = self.src.text[self.pos..].chars().next();
                    match c {
                        Some(c) if c.is_whitespace() || c == '\u{feff}' => {
                            self.pos += c.len_utf8();
                        }
                        _ => return Ok(saw_newline),
                    }
                }
                None => return Ok(saw_newline),
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token, Diagnostic> {
        let start = self.pos;
        self.pos += 1;
        let mut s = String::new();
        loop {
            let c = match self.src.text[self.pos..].chars().next() {
                None | Some('\n') => {
                    return Err(self.err(start, "unterminated string literal"))
                }
                Some(c) => c,
            };
            if c as u32 == quote as u32 {
                self.pos += 1;
                return Ok(Token::Str(s));
            }
            if c != '\\' {
                s.push(c);
                self.pos += c.len_utf8();
                continue;
            }
            self.pos += 1;
            let esc = match self.src.text[self.pos..].chars().next() {
                None => return Err(self.err(start, "unterminated escape in string")),
                Some(e) => e,
            };
            self.pos += esc.len_utf8();
            match esc {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                'r' => s.push('\r'),
                '0' => s.push('\0'),
                '\\' => s.push('\\'),
                '\'' => s.push('\''),
                '"' => s.push('"'),
                'u' => {
                    let hex = self.src.text.get(self.pos..self.pos + 4).unwrap_or("");
                    let code = u32::from_str_radix(hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            self.err(self.pos - 2, "invalid \\u escape: expected 4 hex digits")
                        })?;
                    s.push(code);
                    self.pos += 4;
                }
                other => {
                    return Err(self.err(
                        self.pos - 2,
                        format!("unsupported escape sequence '\\{}'", other),
                    ))
                }
            }
        }
    }

    fn lex_number(&mut self) -> Result<Token, Diagnostic> {
        let start = self.pos;
        let is_digit = |b: u8| b.is_ascii_digit() || b == b'_';
        if self.peek_at(0) == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            while matches!(self.peek_at(0), Some(b) if b.is_ascii_hexdigit() || b == b'_') {
                self.pos += 1;
            }
            if self.pos == start + 2 {
                return Err(self.err(start, "hex literal has no digits"));
            }
        } else {
            while matches!(self.peek_at(0), Some(b) if is_digit(b)) {
                self.pos += 1;
            }
            if self.peek_at(0) == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit())
            {
                self.pos += 1;
                while matches!(self.peek_at(0), Some(b) if is_digit(b)) {
                    self.pos += 1;
                }
            }
            if matches!(self.peek_at(0), Some(b'e' | b'E')) {
                let mut look = 1;
                if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                    look = 2;
                }
                if matches!(self.peek_at(look), Some(b) if b.is_ascii_digit()) {
                    self.pos += look;
                    while matches!(self.peek_at(0), Some(b) if b.is_ascii_digit()) {
                        self.pos += 1;
                    }
                }
            }
        }
        let raw = &self.src.text[start..self.pos];
        if raw.ends_with('_') || raw.contains("__") {
            return Err(self.err(start, format!("invalid numeric separator in '{}'", raw)));
        }
        if matches!(self.peek_at(0), Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$') {
            return Err(self.err(self.pos, "identifier starts immediately after numeric literal"));
        }
        Ok(Token::Num(raw.to_owned()))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub fn lex(src: &SourceFile) -> Result<Vec<Spanned>, Diagnostic> {
    let mut lx = Lexer {
        src,
        bytes: src.text.as_bytes(),
        pos: 0,
        line: 1,
        line_start: 0,
    };
    let mut tokens: Vec<Spanned> = Vec::new();

    loop {
        let newline_before = lx.skip_trivia()?;
        let start = lx.pos;
        let line = lx.line;
        let col = lx.col_of(start);
        let Some(c) = src.text[start..].chars().next() else {
            tokens.push(Spanned {
                token: Token::Eof,
                span: Span::new(start, start),
                line,
                col,
                newline_before: true,
            });
            return Ok(tokens);
        };

        let token = if c == '"' || c == '\'' {
            lx.lex_string(c as u8)?
        } else if c.is_ascii_digit()
            || (c == '.' && matches!(lx.peek_at(1), Some(b) if b.is_ascii_digit()))
        {
            lx.lex_number()?
        } else if is_ident_start(c) {
            let end = src.text[start..]
                .char_indices()
                .find(|(_, ch)| !is_ident_continue(*ch))
                .map_or(src.text.len(), |(i, _)| start + i);
            lx.pos = end;
            Token::Word(src.text[start..end].to_owned())
        } else if c == '`' {
            return Err(lx
                .err(start, "template literals are not supported")
                .with_hint("build strings with + instead"));
        } else if c == '/'
            && !tokens.last().map_or(false, |t| t.token.ends_operand())
        {
            return Err(lx
                .err(start, "regex literals are not supported")
                .with_hint("use regex(Key.name, \"pattern\") inside a pred field"));
        } else {
            let rest = &src.text[start..];
            let Some((text, tok)) = PUNCTUATORS.iter().find(|(p, _)| rest.starts_with(p)) else {
                return Err(lx.err(start, format!("unexpected character '{}'", c)));
            };
            lx.pos += text.len();
            tok.clone()
        };

        tokens.push(Spanned {
            token,
            span: Span::new(start, lx.pos),
            line,
            col,
            newline_before,
        });
    }
}
