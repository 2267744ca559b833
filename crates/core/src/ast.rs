//! PlanScript syntax tree.
//!
//! Produced by the parser and consumed by the extractor, the bundler and the
//! sandbox interpreter. Every node carries the byte span it was parsed from
//! so that the extractor can splice the original text.

// ──────────────────────────────────────────────
// Spans
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::StrictEq => "===",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Raw literal text, digit separators included.
    Number(String),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Paren(Box<Expr>),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Object(Vec<Property>),
    Array(Vec<ArrayItem>),
    Function(Box<Function>),
}

impl ExprKind {
    /// Stable syntax-kind name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Number(_) => "NumericLiteral",
            ExprKind::Str(_) => "StringLiteral",
            ExprKind::Bool(_) => "BooleanLiteral",
            ExprKind::Null => "NullLiteral",
            ExprKind::Undefined => "Undefined",
            ExprKind::Ident(_) => "Identifier",
            ExprKind::Paren(_) => "ParenthesizedExpression",
            ExprKind::Unary { .. } => "UnaryExpression",
            ExprKind::Binary { .. } => "BinaryExpression",
            ExprKind::Logical { .. } => "LogicalExpression",
            ExprKind::Conditional { .. } => "ConditionalExpression",
            ExprKind::Assign { .. } => "AssignmentExpression",
            ExprKind::Member { .. } => "MemberExpression",
            ExprKind::Index { .. } => "IndexExpression",
            ExprKind::Call { .. } => "CallExpression",
            ExprKind::Object(_) => "ObjectLiteral",
            ExprKind::Array(_) => "ArrayLiteral",
            ExprKind::Function(_) => "ArrowFunction",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Strip any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unparen(),
            _ => self,
        }
    }

    /// `ns.name` where `ns` is a bare identifier.
    pub fn as_namespace_member(&self) -> Option<(&str, &str)> {
        match &self.kind {
            ExprKind::Member { object, property } => match &object.kind {
                ExprKind::Ident(ns) => Some((ns.as_str(), property.as_str())),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    KeyValue {
        key: String,
        key_span: Span,
        value: Expr,
    },
    Shorthand {
        name: String,
        span: Span,
    },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
}

/// Binding target of a declaration, parameter or `for…of` head.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    /// `{ a, b: c }` binds `a` to `.a` and `c` to `.b`.
    Object(Vec<(String, String)>),
}

impl Pattern {
    pub fn bound_names(&self) -> Vec<&str> {
        match self {
            Pattern::Ident(n) => vec![n.as_str()],
            Pattern::Object(props) => props.iter().map(|(_, local)| local.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

/// Arrow function, method shorthand or `function` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Pattern>,
    pub body: FunctionBody,
    pub span: Span,
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Decl {
        kind: DeclKind,
        decls: Vec<(Pattern, Option<Expr>)>,
    },
    Function(Function),
    Return(Option<Expr>),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    ForOf {
        kind: DeclKind,
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Throw(Expr),
    Block(Vec<Stmt>),
    Expr(Expr),
    Empty,
}

// ──────────────────────────────────────────────
// Modules
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    pub imported: String,
    pub local: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportClause {
    Named(Vec<ImportName>),
    Default(String),
    Namespace(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Import {
        specifier: String,
        clause: ImportClause,
        span: Span,
    },
    /// `export const …`, `export let …` or `export function …`.
    Export(Stmt),
    ExportDefault(Expr),
    Stmt(Stmt),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub items: Vec<Item>,
}

impl Module {
    /// Names this module exports, `default` included.
    pub fn export_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for item in &self.items {
            match item {
                Item::Export(stmt) => match &stmt.kind {
                    StmtKind::Decl { decls, .. } => {
                        for (pattern, _) in decls {
                            names.extend(pattern.bound_names().into_iter().map(str::to_owned));
                        }
                    }
                    StmtKind::Function(f) => names.extend(f.name.clone()),
                    _ => {}
                },
                Item::ExportDefault(_) => names.push("default".to_owned()),
                _ => {}
            }
        }
        names
    }
}

// ──────────────────────────────────────────────
// Visitors
// ──────────────────────────────────────────────

/// Call `f` on every expression in the module, outermost first, in source
/// order. `f` returns `false` to skip an expression's children.
pub fn walk_module<'a>(module: &'a Module, f: &mut dyn FnMut(&'a Expr) -> bool) {
    for item in &module.items {
        match item {
            Item::Import { .. } => {}
            Item::Export(stmt) | Item::Stmt(stmt) => walk_stmt(stmt, f),
            Item::ExportDefault(expr) => walk_expr(expr, f),
        }
    }
}

pub fn walk_stmt<'a>(stmt: &'a Stmt, f: &mut dyn FnMut(&'a Expr) -> bool) {
    match &stmt.kind {
        StmtKind::Decl { decls, .. } => {
            for (_, init) in decls {
                if let Some(e) = init {
                    walk_expr(e, f);
                }
            }
        }
        StmtKind::Function(func) => walk_function(func, f),
        StmtKind::Return(e) => {
            if let Some(e) = e {
                walk_expr(e, f);
            }
        }
        StmtKind::If {
            test,
            then,
            otherwise,
        } => {
            walk_expr(test, f);
            walk_stmt(then, f);
            if let Some(s) = otherwise {
                walk_stmt(s, f);
            }
        }
        StmtKind::ForOf { iterable, body, .. } => {
            walk_expr(iterable, f);
            walk_stmt(body, f);
        }
        StmtKind::Throw(e) | StmtKind::Expr(e) => walk_expr(e, f),
        StmtKind::Block(stmts) => {
            for s in stmts {
                walk_stmt(s, f);
            }
        }
        StmtKind::Empty => {}
    }
}

fn walk_function<'a>(func: &'a Function, f: &mut dyn FnMut(&'a Expr) -> bool) {
    match &func.body {
        FunctionBody::Expr(e) => walk_expr(e, f),
        FunctionBody::Block(stmts) => {
            for s in stmts {
                walk_stmt(s, f);
            }
        }
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr) -> bool) {
    if !f(expr) {
        return;
    }
    match &expr.kind {
        ExprKind::Number(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::Undefined
        | ExprKind::Ident(_) => {}
        ExprKind::Paren(e) | ExprKind::Unary { arg: e, .. } => walk_expr(e, f),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        ExprKind::Conditional {
            test,
            then,
            otherwise,
        } => {
            walk_expr(test, f);
            walk_expr(then, f);
            walk_expr(otherwise, f);
        }
        ExprKind::Assign { target, value } => {
            walk_expr(target, f);
            walk_expr(value, f);
        }
        ExprKind::Member { object, .. } => walk_expr(object, f),
        ExprKind::Index { object, index } => {
            walk_expr(object, f);
            walk_expr(index, f);
        }
        ExprKind::Call { callee, args } => {
            walk_expr(callee, f);
            for a in args {
                walk_expr(a, f);
            }
        }
        ExprKind::Object(props) => {
            for p in props {
                match p {
                    Property::KeyValue { value, .. } => walk_expr(value, f),
                    Property::Spread(e) => walk_expr(e, f),
                    Property::Shorthand { .. } => {}
                }
            }
        }
        ExprKind::Array(items) => {
            for item in items {
                match item {
                    ArrayItem::Item(e) | ArrayItem::Spread(e) => walk_expr(e, f),
                }
            }
        }
        ExprKind::Function(func) => walk_function(func, f),
    }
}

/// Parse a numeric literal's raw text: `_` separators are stripped, `0x`
/// hex is accepted. The result may be infinite for huge literals.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return None;
        }
        return hex.chars().try_fold(0.0_f64, |acc, c| {
            c.to_digit(16).map(|d| acc * 16.0 + f64::from(d))
        });
    }
    cleaned.parse::<f64>().ok()
}
