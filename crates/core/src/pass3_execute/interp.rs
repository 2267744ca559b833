//! Tree-walking evaluator for the bundled unit.
//!
//! Operators never coerce: arithmetic takes numbers, `+` also concatenates
//! when either side is a string, relational operators take two numbers or
//! two strings, and `==` differs from `===` only in treating `null` and
//! `undefined` as equal. Every statement and expression costs one step.

use super::value::{
    as_index, number_to_string, ArrayMethod, Builtin, Closure, EnvId, Heap, HeapExhausted, HeapId,
    Value,
};
use crate::ast::{
    parse_number, ArrayItem, BinaryOp, DeclKind, Expr, ExprKind, FunctionBody, ImportClause, Item,
    LogicalOp, Pattern, Property, Span, Stmt, StmtKind, UnaryOp,
};
use crate::config::SandboxLimits;
use crate::error::Diagnostic;
use crate::library::{DSL_SPECIFIER, ENTRY_SPECIFIER, REGISTRY_SPECIFIER};
use crate::pass2_bundle::BundledModule;
use std::collections::HashMap;
use std::rc::Rc;

pub(super) type Exec<T> = Result<T, Diagnostic>;

/// Host and dynamic-code names that plain JavaScript would provide. They are
/// absent from the sandbox; naming one gets a dedicated diagnostic.
const DENIED_GLOBALS: &[&str] = &[
    "eval",
    "Function",
    "globalThis",
    "window",
    "global",
    "self",
    "process",
    "require",
    "module",
    "exports",
    "Buffer",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "clearTimeout",
    "clearInterval",
    "queueMicrotask",
    "fetch",
    "XMLHttpRequest",
    "WebAssembly",
    "Reflect",
    "Proxy",
    "Symbol",
    "Promise",
    "Date",
    "Deno",
    "Bun",
];

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug)]
struct Env {
    parent: Option<EnvId>,
    vars: HashMap<String, Binding>,
}

/// A call site: the module and span of the call expression.
#[derive(Debug, Clone, Copy)]
struct Frame {
    module: usize,
    span: Span,
}

enum Flow {
    Normal,
    Return(Value),
}

pub(super) struct Interpreter<'a> {
    modules: &'a [BundledModule],
    /// Parallel to `modules`: whether the module is compiler-provided.
    library: Vec<bool>,
    plan_module: Option<usize>,
    pub(super) heap: Heap<'a>,
    envs: Vec<Env>,
    pub(super) global: EnvId,
    pub(super) limits: SandboxLimits,
    pub(super) steps: u64,
    frames: Vec<Frame>,
    /// Module whose source the spans being evaluated point into.
    module: usize,
    /// Namespace object of every evaluated module, by specifier.
    exports: HashMap<String, Value>,
    pub(super) emitted: Option<serde_json::Value>,
    pub(super) logs: Vec<String>,
}

impl<'a> Interpreter<'a> {
    pub(super) fn new(modules: &'a [BundledModule], limits: &SandboxLimits) -> Exec<Self> {
        let library = modules
            .iter()
            .map(|m| {
                matches!(
                    m.specifier.as_str(),
                    DSL_SPECIFIER | REGISTRY_SPECIFIER | ENTRY_SPECIFIER
                )
            })
            .collect();
        let plan_module = modules.iter().position(|m| m.specifier.starts_with("plan:"));
        let mut interp = Interpreter {
            modules,
            library,
            plan_module,
            heap: Heap::new(limits.max_heap_cells),
            envs: Vec::new(),
            global: 0,
            limits: limits.clone(),
            steps: 0,
            frames: Vec::new(),
            module: 0,
            exports: HashMap::new(),
            emitted: None,
            logs: Vec::new(),
        };
        interp.global = interp.new_env(None, Span::default())?;
        interp.install_globals()?;
        Ok(interp)
    }

    /// Evaluate every module in bundle order.
    pub(super) fn run(&mut self) -> Exec<()> {
        for idx in 0..self.modules.len() {
            self.run_module(idx)?;
        }
        Ok(())
    }

    // -- Diagnostics ---------------------------------------------------------

    /// Where to report a failure at `span` in the current module. Failures
    /// inside compiler-provided modules are reported at the innermost call
    /// site in plan code instead.
    fn locate(&self, span: Span) -> (usize, Span) {
        if !self.library.get(self.module).copied().unwrap_or(false) {
            return (self.module, span);
        }
        for frame in self.frames.iter().rev() {
            if !self.library[frame.module] {
                return (frame.module, frame.span);
            }
        }
        match self.plan_module {
            Some(plan) => (plan, Span::default()),
            None => (self.module, span),
        }
    }

    pub(super) fn error_at(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        let (module, span) = self.locate(span);
        match self.modules.get(module) {
            Some(m) => m.source.diagnostic(span, message),
            None => Diagnostic::new(ENTRY_SPECIFIER, 1, 1, message),
        }
    }

    /// A diagnostic at the top of the plan file.
    pub(super) fn plan_diagnostic(&self, message: impl Into<String>) -> Diagnostic {
        match self.plan_module.and_then(|i| self.modules.get(i)) {
            Some(m) => m.source.diagnostic(Span::default(), message),
            None => Diagnostic::new(ENTRY_SPECIFIER, 1, 1, message),
        }
    }

    fn heap_exhausted(&self, span: Span, e: HeapExhausted) -> Diagnostic {
        self.error_at(
            span,
            format!("plan exceeded the sandbox heap limit of {} cells", e.0),
        )
        .with_hint("reduce the number of objects and arrays the plan creates")
    }

    // -- Budgets and allocation ---------------------------------------------

    fn tick(&mut self, span: Span) -> Exec<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(self
                .error_at(
                    span,
                    format!(
                        "plan exceeded the step budget of {} steps",
                        self.limits.max_steps
                    ),
                )
                .with_hint("look for unbounded loops or recursion in build()"));
        }
        Ok(())
    }

    pub(super) fn charge(&mut self, cells: usize, span: Span) -> Exec<()> {
        self.heap
            .charge(cells)
            .map_err(|e| self.heap_exhausted(span, e))
    }

    pub(super) fn new_object(&mut self, props: Vec<(Rc<str>, Value)>, span: Span) -> Exec<Value> {
        self.heap
            .alloc_object(props)
            .map_err(|e| self.heap_exhausted(span, e))
    }

    pub(super) fn new_array(&mut self, items: Vec<Value>, span: Span) -> Exec<Value> {
        self.heap
            .alloc_array(items)
            .map_err(|e| self.heap_exhausted(span, e))
    }

    fn new_closure(&mut self, closure: Closure<'a>, span: Span) -> Exec<Value> {
        self.heap
            .alloc_closure(closure)
            .map_err(|e| self.heap_exhausted(span, e))
    }

    // -- Scopes --------------------------------------------------------------

    fn new_env(&mut self, parent: Option<EnvId>, span: Span) -> Exec<EnvId> {
        self.charge(1, span)?;
        self.envs.push(Env {
            parent,
            vars: HashMap::new(),
        });
        Ok(self.envs.len() - 1)
    }

    pub(super) fn declare(
        &mut self,
        env: EnvId,
        name: &str,
        value: Value,
        mutable: bool,
        span: Span,
    ) -> Exec<()> {
        if self.envs[env].vars.contains_key(name) {
            return Err(self.error_at(span, format!("'{}' has already been declared", name)));
        }
        self.charge(1, span)?;
        self.envs[env]
            .vars
            .insert(name.to_owned(), Binding { value, mutable });
        Ok(())
    }

    /// Innermost scope that binds `name`.
    fn scope_of(&self, env: EnvId, name: &str) -> Option<EnvId> {
        let mut cur = Some(env);
        while let Some(id) = cur {
            if self.envs[id].vars.contains_key(name) {
                return Some(id);
            }
            cur = self.envs[id].parent;
        }
        None
    }

    fn undefined_name(&self, name: &str, span: Span) -> Diagnostic {
        if DENIED_GLOBALS.contains(&name) {
            self.error_at(
                span,
                format!("'{}' is not available in the plan sandbox", name),
            )
            .with_hint("plans run without host, timer or dynamic-code APIs")
        } else {
            self.error_at(span, format!("'{}' is not defined", name))
        }
    }

    fn read_var(&self, env: EnvId, name: &str, span: Span) -> Exec<Value> {
        match self.scope_of(env, name) {
            Some(scope) => Ok(self.envs[scope].vars[name].value.clone()),
            None => Err(self.undefined_name(name, span)),
        }
    }

    fn write_var(&mut self, env: EnvId, name: &str, value: Value, span: Span) -> Exec<()> {
        let Some(scope) = self.scope_of(env, name) else {
            return Err(self.undefined_name(name, span));
        };
        let mutable = self.envs[scope].vars[name].mutable;
        if !mutable {
            return Err(self.error_at(span, format!("assignment to constant '{}'", name)));
        }
        if let Some(binding) = self.envs[scope].vars.get_mut(name) {
            binding.value = value;
        }
        Ok(())
    }

    fn bind_pattern(
        &mut self,
        env: EnvId,
        pattern: &Pattern,
        value: Value,
        mutable: bool,
        span: Span,
    ) -> Exec<()> {
        match pattern {
            Pattern::Ident(name) => self.declare(env, name, value, mutable, span),
            Pattern::Object(props) => {
                for (key, local) in props {
                    let v = self.get_member(&value, key, span)?;
                    self.declare(env, local, v, mutable, span)?;
                }
                Ok(())
            }
        }
    }

    /// Bind every function declaration in `stmts` before any of them run.
    fn hoist(&mut self, stmts: impl Iterator<Item = &'a Stmt>, env: EnvId) -> Exec<()> {
        for stmt in stmts {
            if let StmtKind::Function(func) = &stmt.kind {
                let Some(name) = &func.name else { continue };
                let closure = self.new_closure(
                    Closure {
                        func,
                        env,
                        module: self.module,
                    },
                    stmt.span,
                )?;
                self.declare(env, name, closure, true, stmt.span)?;
            }
        }
        Ok(())
    }

    // -- Modules -------------------------------------------------------------

    fn run_module(&mut self, idx: usize) -> Exec<()> {
        let modules = self.modules;
        let m = &modules[idx];
        self.module = idx;
        let env = self.new_env(Some(self.global), Span::default())?;

        for item in &m.module.items {
            let Item::Import {
                specifier,
                clause,
                span,
            } = item
            else {
                continue;
            };
            let Some(ns) = self.exports.get(specifier).cloned() else {
                return Err(self.error_at(
                    *span,
                    format!("module '{}' has not been evaluated", specifier),
                ));
            };
            match clause {
                ImportClause::Namespace(local) => self.declare(env, local, ns, false, *span)?,
                ImportClause::Default(local) => {
                    let v = self.get_member(&ns, "default", *span)?;
                    self.declare(env, local, v, false, *span)?;
                }
                ImportClause::Named(names) => {
                    for name in names {
                        let v = self.get_member(&ns, &name.imported, name.span)?;
                        self.declare(env, &name.local, v, false, name.span)?;
                    }
                }
            }
        }

        self.hoist(
            m.module.items.iter().filter_map(|item| match item {
                Item::Stmt(s) | Item::Export(s) => Some(s),
                _ => None,
            }),
            env,
        )?;

        let mut default = Value::Undefined;
        for item in &m.module.items {
            match item {
                Item::Import { .. } => {}
                Item::Stmt(stmt) | Item::Export(stmt) => {
                    if let Flow::Return(_) = self.exec_stmt(stmt, env)? {
                        return Err(self.error_at(
                            stmt.span,
                            "'return' is only allowed inside a function",
                        ));
                    }
                }
                Item::ExportDefault(expr) => default = self.eval(expr, env)?,
            }
        }

        let mut props: Vec<(Rc<str>, Value)> = Vec::new();
        for name in m.module.export_names() {
            let value = if name == "default" {
                default.clone()
            } else {
                self.read_var(env, &name, Span::default())?
            };
            props.push((name.into(), value));
        }
        let ns = self.new_object(props, Span::default())?;
        self.exports.insert(m.specifier.clone(), ns);
        Ok(())
    }

    // -- Statements ----------------------------------------------------------

    fn exec_block(&mut self, stmts: &'a [Stmt], env: EnvId) -> Exec<Flow> {
        self.hoist(stmts.iter(), env)?;
        for stmt in stmts {
            if let Flow::Return(v) = self.exec_stmt(stmt, env)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &'a Stmt, env: EnvId) -> Exec<Flow> {
        self.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Decl { kind, decls } => {
                for (pattern, init) in decls {
                    let value = match init {
                        Some(e) => self.eval(e, env)?,
                        None => Value::Undefined,
                    };
                    self.bind_pattern(env, pattern, value, *kind == DeclKind::Let, stmt.span)?;
                }
                Ok(Flow::Normal)
            }
            // Bound by `hoist`.
            StmtKind::Function(_) => Ok(Flow::Normal),
            StmtKind::Return(e) => {
                let value = match e {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.exec_stmt(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::ForOf {
                kind,
                pattern,
                iterable,
                body,
            } => {
                let items = self.eval(iterable, env)?;
                let Value::Array(id) = items else {
                    return Err(self.error_at(
                        iterable.span,
                        format!("for…of expects an array, got {}", items.describe()),
                    ));
                };
                let mut i = 0;
                while let Some(item) = self.heap.array(id).get(i).cloned() {
                    let iter_env = self.new_env(Some(env), stmt.span)?;
                    self.bind_pattern(iter_env, pattern, item, *kind == DeclKind::Let, stmt.span)?;
                    if let Flow::Return(v) = self.exec_stmt(body, iter_env)? {
                        return Ok(Flow::Return(v));
                    }
                    i += 1;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Throw(e) => {
                let value = self.eval(e, env)?;
                Err(self.uncaught(&value, stmt.span))
            }
            StmtKind::Block(stmts) => {
                let inner = self.new_env(Some(env), stmt.span)?;
                self.exec_block(stmts, inner)
            }
            StmtKind::Expr(e) => {
                self.eval(e, env)?;
                Ok(Flow::Normal)
            }
            StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    fn uncaught(&self, value: &Value, span: Span) -> Diagnostic {
        let message = match value {
            Value::Object(id) => match self.heap.get_property(*id, "message") {
                Some(Value::Str(s)) => s.to_string(),
                _ => self.to_display(value),
            },
            _ => self.to_display(value),
        };
        self.error_at(span, format!("uncaught error: {}", message))
    }

    // -- Expressions ---------------------------------------------------------

    fn eval(&mut self, expr: &'a Expr, env: EnvId) -> Exec<Value> {
        self.tick(expr.span)?;
        match &expr.kind {
            ExprKind::Number(raw) => Ok(Value::Number(parse_number(raw).unwrap_or(f64::NAN))),
            ExprKind::Str(s) => Ok(Value::str(s.as_str())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::Ident(name) => self.read_var(env, name, expr.span),
            ExprKind::Paren(inner) => self.eval(inner, env),
            ExprKind::Unary { op, arg } => {
                let v = self.eval(arg, env)?;
                self.unary(*op, v, expr.span)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                self.binary(*op, l, r, expr.span)
            }
            ExprKind::Logical { op, left, right } => {
                let l = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right, env)
                }
            }
            ExprKind::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(then, env)
                } else {
                    self.eval(otherwise, env)
                }
            }
            ExprKind::Assign { target, value } => self.assign(target, value, env),
            ExprKind::Member { object, property } => {
                let o = self.eval(object, env)?;
                self.get_member(&o, property, expr.span)
            }
            ExprKind::Index { object, index } => {
                let o = self.eval(object, env)?;
                let k = self.eval(index, env)?;
                self.get_index(&o, &k, expr.span)
            }
            ExprKind::Call { callee, args } => {
                let f = self.eval(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, env)?);
                }
                if !matches!(f, Value::Function(_) | Value::Builtin(_)) {
                    let text = self.modules[self.module].source.slice(callee.span);
                    return Err(self.error_at(callee.span, format!("'{}' is not a function", text)));
                }
                self.call(f, values, expr.span)
            }
            ExprKind::Object(props) => self.eval_object(props, env, expr.span),
            ExprKind::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ArrayItem::Item(e) => out.push(self.eval(e, env)?),
                        ArrayItem::Spread(e) => match self.eval(e, env)? {
                            Value::Array(id) => out.extend_from_slice(self.heap.array(id)),
                            other => {
                                return Err(self.error_at(
                                    e.span,
                                    format!("cannot spread {} into an array", other.describe()),
                                ))
                            }
                        },
                    }
                }
                self.new_array(out, expr.span)
            }
            ExprKind::Function(func) => self.new_closure(
                Closure {
                    func: &**func,
                    env,
                    module: self.module,
                },
                expr.span,
            ),
        }
    }

    fn eval_object(&mut self, props: &'a [Property], env: EnvId, span: Span) -> Exec<Value> {
        fn upsert(out: &mut Vec<(Rc<str>, Value)>, key: Rc<str>, value: Value) {
            match out.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => out.push((key, value)),
            }
        }

        let mut out: Vec<(Rc<str>, Value)> = Vec::new();
        for prop in props {
            match prop {
                Property::KeyValue { key, value, .. } => {
                    let v = self.eval(value, env)?;
                    upsert(&mut out, key.as_str().into(), v);
                }
                Property::Shorthand { name, span } => {
                    let v = self.read_var(env, name, *span)?;
                    upsert(&mut out, name.as_str().into(), v);
                }
                Property::Spread(e) => match self.eval(e, env)? {
                    Value::Object(id) => {
                        for (k, v) in self.heap.object(id).to_vec() {
                            upsert(&mut out, k, v);
                        }
                    }
                    Value::Array(id) => {
                        for (i, v) in self.heap.array(id).to_vec().into_iter().enumerate() {
                            upsert(&mut out, i.to_string().into(), v);
                        }
                    }
                    Value::Undefined | Value::Null => {}
                    other => {
                        return Err(self.error_at(
                            e.span,
                            format!("cannot spread {} into an object", other.describe()),
                        ))
                    }
                },
            }
        }
        self.new_object(out, span)
    }

    fn assign(&mut self, target: &'a Expr, value: &'a Expr, env: EnvId) -> Exec<Value> {
        match &target.kind {
            ExprKind::Ident(name) => {
                let v = self.eval(value, env)?;
                self.write_var(env, name, v.clone(), target.span)?;
                Ok(v)
            }
            ExprKind::Member { object, property } => {
                let o = self.eval(object, env)?;
                let v = self.eval(value, env)?;
                self.set_member(&o, property, v.clone(), target.span)?;
                Ok(v)
            }
            ExprKind::Index { object, index } => {
                let o = self.eval(object, env)?;
                let k = self.eval(index, env)?;
                let v = self.eval(value, env)?;
                match (&o, as_index(&k)) {
                    (Value::Array(id), Some(i)) => self.set_element(*id, i, v.clone(), target.span)?,
                    _ => {
                        let name = self.to_display(&k);
                        self.set_member(&o, &name, v.clone(), target.span)?;
                    }
                }
                Ok(v)
            }
            _ => Err(self.error_at(target.span, "invalid assignment target")),
        }
    }

    fn unary(&mut self, op: UnaryOp, v: Value, span: Span) -> Exec<Value> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
            UnaryOp::Typeof => Ok(Value::str(v.type_of())),
            UnaryOp::Neg | UnaryOp::Plus => match v {
                Value::Number(n) if op == UnaryOp::Neg => Ok(Value::Number(-n)),
                Value::Number(n) => Ok(Value::Number(n)),
                other => {
                    let sym = if op == UnaryOp::Neg { "-" } else { "+" };
                    Err(self.error_at(
                        span,
                        format!("unary '{}' expects a number, got {}", sym, other.describe()),
                    ))
                }
            },
        }
    }

    fn binary(&mut self, op: BinaryOp, l: Value, r: Value, span: Span) -> Exec<Value> {
        match op {
            BinaryOp::StrictEq => return Ok(Value::Bool(l.strict_equals(&r))),
            BinaryOp::StrictNe => return Ok(Value::Bool(!l.strict_equals(&r))),
            BinaryOp::Eq => return Ok(Value::Bool(l.loose_equals(&r))),
            BinaryOp::Ne => return Ok(Value::Bool(!l.loose_equals(&r))),
            _ => {}
        }
        if let (Value::Number(a), Value::Number(b)) = (&l, &r) {
            let (a, b) = (*a, *b);
            return Ok(match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div => Value::Number(a / b),
                BinaryOp::Rem => Value::Number(a % b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                _ => Value::Bool(a >= b),
            });
        }
        match op {
            BinaryOp::Add if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) => {
                let s = format!("{}{}", self.to_display(&l), self.to_display(&r));
                self.charge(s.len() / 16, span)?;
                Ok(Value::str(s))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Le => a <= b,
                    BinaryOp::Gt => a > b,
                    _ => a >= b,
                })),
                _ => Err(self.error_at(
                    span,
                    format!(
                        "operator '{}' expects two numbers or two strings, got {} and {}",
                        op.as_str(),
                        l.describe(),
                        r.describe()
                    ),
                )),
            },
            _ => {
                let expected = if op == BinaryOp::Add {
                    "numbers or strings"
                } else {
                    "numbers"
                };
                Err(self.error_at(
                    span,
                    format!(
                        "operator '{}' expects {}, got {} and {}",
                        op.as_str(),
                        expected,
                        l.describe(),
                        r.describe()
                    ),
                ))
            }
        }
    }

    // -- Properties ----------------------------------------------------------

    pub(super) fn get_member(&self, obj: &Value, name: &str, span: Span) -> Exec<Value> {
        match obj {
            Value::Undefined | Value::Null => Err(self.error_at(
                span,
                format!("cannot read property '{}' of {}", name, obj.describe()),
            )),
            Value::Object(id) => Ok(self
                .heap
                .get_property(*id, name)
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Array(id) => {
                let items = self.heap.array(*id);
                if name == "length" {
                    return Ok(Value::Number(items.len() as f64));
                }
                if let Some(m) = ArrayMethod::lookup(name) {
                    return Ok(Value::Builtin(Builtin::Array(m, *id)));
                }
                Ok(as_index(&Value::str(name))
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined))
            }
            Value::Str(s) if name == "length" => {
                Ok(Value::Number(s.encode_utf16().count() as f64))
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn get_index(&self, obj: &Value, key: &Value, span: Span) -> Exec<Value> {
        match (obj, as_index(key)) {
            (Value::Array(id), Some(i)) => Ok(self
                .heap
                .array(*id)
                .get(i)
                .cloned()
                .unwrap_or(Value::Undefined)),
            (Value::Str(s), Some(i)) => Ok(s
                .chars()
                .nth(i)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or(Value::Undefined)),
            _ => self.get_member(obj, &self.to_display(key), span),
        }
    }

    fn set_member(&mut self, obj: &Value, name: &str, value: Value, span: Span) -> Exec<()> {
        match obj {
            Value::Object(id) => self
                .heap
                .set_property(*id, name, value)
                .map_err(|e| self.heap_exhausted(span, e)),
            Value::Array(id) => match as_index(&Value::str(name)) {
                Some(i) => self.set_element(*id, i, value, span),
                None => Err(self.error_at(
                    span,
                    format!("cannot set property '{}' on an array", name),
                )),
            },
            other => Err(self.error_at(
                span,
                format!("cannot set property '{}' on {}", name, other.describe()),
            )),
        }
    }

    pub(super) fn set_element(
        &mut self,
        id: HeapId,
        index: usize,
        value: Value,
        span: Span,
    ) -> Exec<()> {
        let len = self.heap.array(id).len();
        if index > len {
            return Err(self.error_at(
                span,
                format!(
                    "sparse arrays are not supported: index {} is past the end of an array of length {}",
                    index, len
                ),
            ));
        }
        if index == len {
            self.charge(1, span)?;
        }
        if let Some(items) = self.heap.array_mut(id) {
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
        }
        Ok(())
    }

    /// String conversion as `String(v)` performs it.
    pub(super) fn to_display(&self, v: &Value) -> String {
        self.display_inner(v, &mut Vec::new())
    }

    fn display_inner(&self, v: &Value, seen: &mut Vec<HeapId>) -> String {
        match v {
            Value::Undefined => "undefined".to_owned(),
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_owned(),
            Value::Function(_) | Value::Builtin(_) => "function".to_owned(),
            Value::Array(id) => {
                if seen.contains(id) {
                    return String::new();
                }
                seen.push(*id);
                let parts: Vec<String> = self
                    .heap
                    .array(*id)
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            self.display_inner(item, seen)
                        }
                    })
                    .collect();
                seen.pop();
                parts.join(",")
            }
        }
    }

    // -- Calls ---------------------------------------------------------------

    pub(super) fn call(&mut self, f: Value, args: Vec<Value>, span: Span) -> Exec<Value> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(self
                .error_at(
                    span,
                    format!(
                        "maximum call depth of {} exceeded",
                        self.limits.max_call_depth
                    ),
                )
                .with_hint("look for unbounded recursion"));
        }
        self.frames.push(Frame {
            module: self.module,
            span,
        });
        let result = match f {
            Value::Function(id) => self.call_closure(id, args, span),
            Value::Builtin(b) => self.call_builtin(b, args, span),
            other => Err(self.error_at(span, format!("{} is not a function", other.describe()))),
        };
        self.frames.pop();
        result
    }

    fn call_closure(&mut self, id: HeapId, args: Vec<Value>, span: Span) -> Exec<Value> {
        let Some(closure) = self.heap.closure(id) else {
            return Err(self.error_at(span, "value is not a function"));
        };
        let caller = self.module;
        self.module = closure.module;
        let result = self.invoke(closure, args);
        self.module = caller;
        result
    }

    fn invoke(&mut self, closure: Closure<'a>, args: Vec<Value>) -> Exec<Value> {
        let func = closure.func;
        let env = self.new_env(Some(closure.env), func.span)?;
        let mut args = args.into_iter();
        for param in &func.params {
            let v = args.next().unwrap_or(Value::Undefined);
            self.bind_pattern(env, param, v, true, func.span)?;
        }
        match &func.body {
            FunctionBody::Expr(e) => self.eval(e, env),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, env)? {
                Flow::Return(v) => Ok(v),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }
}
