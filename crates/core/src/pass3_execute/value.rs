//! Sandbox runtime values and the heap arena they point into.

use crate::ast::Function;
use rankplan_ir::canonical::format_f64;
use std::rc::Rc;

pub(super) type HeapId = usize;
pub(super) type EnvId = usize;

// ──────────────────────────────────────────────
// Values
// ──────────────────────────────────────────────

/// A sandbox value. Objects, arrays and closures live in the [`Heap`] and
/// are referenced by index, so identity comparison is index comparison.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(HeapId),
    Array(HeapId),
    Function(HeapId),
    Builtin(Builtin),
}

impl Value {
    pub(super) fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Result of the `typeof` operator.
    pub(super) fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Array(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    /// Type name used in error messages.
    pub(super) fn describe(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Function(_) | Value::Builtin(_) => "function",
        }
    }

    pub(super) fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Function(_) | Value::Builtin(_) => true,
        }
    }

    pub(super) fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// `===`: no coercion, NaN is unequal to itself, heap values compare by
    /// identity.
    pub(super) fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => self == other,
        }
    }

    /// `==`: strict equality, except that `null` and `undefined` are equal
    /// to each other.
    pub(super) fn loose_equals(&self, other: &Value) -> bool {
        (self.is_nullish() && other.is_nullish()) || self.strict_equals(other)
    }

    /// Equality used by `includes`: like `===`, but NaN matches NaN.
    pub(super) fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

pub(super) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n == f64::INFINITY {
        "Infinity".to_owned()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else {
        format_f64(n)
    }
}

/// Array index denoted by a property value: a non-negative integral number
/// or its canonical string form.
pub(super) fn as_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n < usize::MAX as f64 => {
            Some(*n as usize)
        }
        Value::Str(s) => {
            let i: usize = s.parse().ok()?;
            (i.to_string() == **s).then_some(i)
        }
        _ => None,
    }
}

// ──────────────────────────────────────────────
// Host functions
// ──────────────────────────────────────────────

/// Functions provided by the host rather than written in PlanScript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Builtin {
    ConsoleLog,
    Emit,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ArrayIsArray,
    NumberIsFinite,
    NumberIsInteger,
    MathMin,
    MathMax,
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    String,
    Error,
    /// A method looked up on a specific array.
    Array(ArrayMethod, HeapId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ArrayMethod {
    Push,
    Includes,
    IndexOf,
    Join,
    Slice,
    Concat,
    Sort,
    Map,
    Filter,
    ForEach,
}

impl ArrayMethod {
    pub(super) fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "push" => ArrayMethod::Push,
            "includes" => ArrayMethod::Includes,
            "indexOf" => ArrayMethod::IndexOf,
            "join" => ArrayMethod::Join,
            "slice" => ArrayMethod::Slice,
            "concat" => ArrayMethod::Concat,
            "sort" => ArrayMethod::Sort,
            "map" => ArrayMethod::Map,
            "filter" => ArrayMethod::Filter,
            "forEach" => ArrayMethod::ForEach,
            _ => return None,
        })
    }
}

// ──────────────────────────────────────────────
// Heap
// ──────────────────────────────────────────────

/// A PlanScript function value: the syntax it was created from, the scope
/// it closes over and the module whose source its spans point into.
#[derive(Debug, Clone, Copy)]
pub(super) struct Closure<'a> {
    pub func: &'a Function,
    pub env: EnvId,
    pub module: usize,
}

#[derive(Debug)]
pub(super) enum Cell<'a> {
    /// Properties in insertion order.
    Object(Vec<(Rc<str>, Value)>),
    Array(Vec<Value>),
    Closure(Closure<'a>),
}

/// Arena of heap cells. Nothing is freed before the interpreter is
/// dropped; `charge` enforces the cell budget instead.
#[derive(Debug)]
pub(super) struct Heap<'a> {
    cells: Vec<Cell<'a>>,
    used: usize,
    limit: usize,
}

/// The heap budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct HeapExhausted(pub usize);

impl<'a> Heap<'a> {
    pub(super) fn new(limit: usize) -> Self {
        Heap {
            cells: Vec::new(),
            used: 0,
            limit,
        }
    }

    pub(super) fn charge(&mut self, cells: usize) -> Result<(), HeapExhausted> {
        self.used = self.used.saturating_add(cells);
        if self.used > self.limit {
            return Err(HeapExhausted(self.limit));
        }
        Ok(())
    }

    fn alloc(&mut self, cell: Cell<'a>, size: usize) -> Result<HeapId, HeapExhausted> {
        self.charge(1 + size)?;
        self.cells.push(cell);
        Ok(self.cells.len() - 1)
    }

    pub(super) fn alloc_object(
        &mut self,
        props: Vec<(Rc<str>, Value)>,
    ) -> Result<Value, HeapExhausted> {
        let n = props.len();
        Ok(Value::Object(self.alloc(Cell::Object(props), n)?))
    }

    pub(super) fn alloc_array(&mut self, items: Vec<Value>) -> Result<Value, HeapExhausted> {
        let n = items.len();
        Ok(Value::Array(self.alloc(Cell::Array(items), n)?))
    }

    pub(super) fn alloc_closure(&mut self, closure: Closure<'a>) -> Result<Value, HeapExhausted> {
        Ok(Value::Function(self.alloc(Cell::Closure(closure), 0)?))
    }

    pub(super) fn get(&self, id: HeapId) -> Option<&Cell<'a>> {
        self.cells.get(id)
    }

    pub(super) fn object(&self, id: HeapId) -> &[(Rc<str>, Value)] {
        match self.cells.get(id) {
            Some(Cell::Object(props)) => props,
            _ => &[],
        }
    }

    pub(super) fn array(&self, id: HeapId) -> &[Value] {
        match self.cells.get(id) {
            Some(Cell::Array(items)) => items,
            _ => &[],
        }
    }

    pub(super) fn array_mut(&mut self, id: HeapId) -> Option<&mut Vec<Value>> {
        match self.cells.get_mut(id) {
            Some(Cell::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub(super) fn closure(&self, id: HeapId) -> Option<Closure<'a>> {
        match self.cells.get(id) {
            Some(Cell::Closure(c)) => Some(*c),
            _ => None,
        }
    }

    pub(super) fn get_property(&self, id: HeapId, key: &str) -> Option<&Value> {
        self.object(id)
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    /// Insert or overwrite; a new property costs one cell.
    pub(super) fn set_property(
        &mut self,
        id: HeapId,
        key: &str,
        value: Value,
    ) -> Result<(), HeapExhausted> {
        let Some(Cell::Object(props)) = self.cells.get_mut(id) else {
            return Ok(());
        };
        if let Some(slot) = props.iter_mut().find(|(k, _)| &**k == key) {
            slot.1 = value;
            return Ok(());
        }
        props.push((key.into(), value));
        self.charge(1)
    }
}
