//! The sandbox's global environment and host function implementations.
//!
//! Globals are an allow-list. Besides the `console.log` hook and the
//! `__emit` entry point there are only pure, deterministic helpers.

use super::capture::{capture, CaptureError};
use super::interp::{Exec, Interpreter};
use super::value::{ArrayMethod, Builtin, HeapId, Value};
use crate::ast::Span;
use std::rc::Rc;
use tracing::info;

fn builtin_name(b: Builtin) -> &'static str {
    match b {
        Builtin::ConsoleLog => "console.log",
        Builtin::Emit => "__emit",
        Builtin::ObjectKeys => "Object.keys",
        Builtin::ObjectValues => "Object.values",
        Builtin::ObjectEntries => "Object.entries",
        Builtin::ArrayIsArray => "Array.isArray",
        Builtin::NumberIsFinite => "Number.isFinite",
        Builtin::NumberIsInteger => "Number.isInteger",
        Builtin::MathMin => "Math.min",
        Builtin::MathMax => "Math.max",
        Builtin::MathAbs => "Math.abs",
        Builtin::MathFloor => "Math.floor",
        Builtin::MathCeil => "Math.ceil",
        Builtin::MathRound => "Math.round",
        Builtin::String => "String",
        Builtin::Error => "Error",
        Builtin::Array(m, _) => match m {
            ArrayMethod::Push => "push",
            ArrayMethod::Includes => "includes",
            ArrayMethod::IndexOf => "indexOf",
            ArrayMethod::Join => "join",
            ArrayMethod::Slice => "slice",
            ArrayMethod::Concat => "concat",
            ArrayMethod::Sort => "sort",
            ArrayMethod::Map => "map",
            ArrayMethod::Filter => "filter",
            ArrayMethod::ForEach => "forEach",
        },
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn props(entries: &[(&str, Value)]) -> Vec<(Rc<str>, Value)> {
    entries
        .iter()
        .map(|(k, v)| (Rc::from(*k), v.clone()))
        .collect()
}

impl<'a> Interpreter<'a> {
    pub(super) fn install_globals(&mut self) -> Exec<()> {
        let at = Span::default();
        let namespaces: [(&str, Vec<(&str, Value)>); 5] = [
            ("console", vec![("log", Value::Builtin(Builtin::ConsoleLog))]),
            (
                "Object",
                vec![
                    ("keys", Value::Builtin(Builtin::ObjectKeys)),
                    ("values", Value::Builtin(Builtin::ObjectValues)),
                    ("entries", Value::Builtin(Builtin::ObjectEntries)),
                ],
            ),
            ("Array", vec![("isArray", Value::Builtin(Builtin::ArrayIsArray))]),
            (
                "Number",
                vec![
                    ("isFinite", Value::Builtin(Builtin::NumberIsFinite)),
                    ("isInteger", Value::Builtin(Builtin::NumberIsInteger)),
                ],
            ),
            (
                "Math",
                vec![
                    ("min", Value::Builtin(Builtin::MathMin)),
                    ("max", Value::Builtin(Builtin::MathMax)),
                    ("abs", Value::Builtin(Builtin::MathAbs)),
                    ("floor", Value::Builtin(Builtin::MathFloor)),
                    ("ceil", Value::Builtin(Builtin::MathCeil)),
                    ("round", Value::Builtin(Builtin::MathRound)),
                ],
            ),
        ];
        let global = self.global;
        for (name, members) in namespaces {
            let ns = self.new_object(props(&members), at)?;
            self.declare(global, name, ns, false, at)?;
        }
        let plain = [
            ("__emit", Value::Builtin(Builtin::Emit)),
            ("String", Value::Builtin(Builtin::String)),
            ("Error", Value::Builtin(Builtin::Error)),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        for (name, value) in plain {
            self.declare(global, name, value, false, at)?;
        }
        Ok(())
    }

    pub(super) fn call_builtin(&mut self, b: Builtin, args: Vec<Value>, span: Span) -> Exec<Value> {
        match b {
            Builtin::ConsoleLog => {
                let line = args
                    .iter()
                    .map(|a| self.to_display(a))
                    .collect::<Vec<_>>()
                    .join(" ");
                info!(target: "rankplan::sandbox", "{}", line);
                self.logs.push(line);
                Ok(Value::Undefined)
            }
            Builtin::Emit => self.emit(arg(&args, 0), span),
            Builtin::ObjectKeys | Builtin::ObjectValues | Builtin::ObjectEntries => {
                let entries = self.own_entries(&arg(&args, 0), b, span)?;
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push(match b {
                        Builtin::ObjectKeys => Value::Str(k),
                        Builtin::ObjectValues => v,
                        _ => self.new_array(vec![Value::Str(k), v], span)?,
                    });
                }
                self.new_array(out, span)
            }
            Builtin::ArrayIsArray => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
            Builtin::NumberIsFinite => Ok(Value::Bool(
                matches!(arg(&args, 0), Value::Number(n) if n.is_finite()),
            )),
            Builtin::NumberIsInteger => Ok(Value::Bool(
                matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0),
            )),
            Builtin::MathMin | Builtin::MathMax => {
                let mut acc = if b == Builtin::MathMin {
                    f64::INFINITY
                } else {
                    f64::NEG_INFINITY
                };
                for a in &args {
                    let n = self.number_arg(a, b, span)?;
                    acc = if n.is_nan() || acc.is_nan() {
                        f64::NAN
                    } else if b == Builtin::MathMin {
                        acc.min(n)
                    } else {
                        acc.max(n)
                    };
                }
                Ok(Value::Number(acc))
            }
            Builtin::MathAbs | Builtin::MathFloor | Builtin::MathCeil | Builtin::MathRound => {
                let n = self.number_arg(&arg(&args, 0), b, span)?;
                Ok(Value::Number(match b {
                    Builtin::MathAbs => n.abs(),
                    Builtin::MathFloor => n.floor(),
                    Builtin::MathCeil => n.ceil(),
                    _ => (n + 0.5).floor(),
                }))
            }
            Builtin::String => {
                if args.is_empty() {
                    return Ok(Value::str(""));
                }
                Ok(Value::str(self.to_display(&args[0])))
            }
            Builtin::Error => {
                let message = match arg(&args, 0) {
                    Value::Undefined => String::new(),
                    other => self.to_display(&other),
                };
                self.new_object(
                    props(&[
                        ("name", Value::str("Error")),
                        ("message", Value::str(message)),
                    ]),
                    span,
                )
            }
            Builtin::Array(m, id) => self.call_array_method(m, id, args, span),
        }
    }

    fn emit(&mut self, value: Value, span: Span) -> Exec<Value> {
        if self.emitted.is_some() {
            return Err(self
                .error_at(span, "ambiguous emit: the plan emitted more than one artifact")
                .with_hint("define one plan per file and export it as the default export"));
        }
        let remaining = self.limits.max_steps.saturating_sub(self.steps);
        let (captured, visited) = capture(&self.heap, &value, remaining).map_err(|e| {
            let diag = self.error_at(span, e.to_string());
            match e {
                CaptureError::Budget { .. } => diag.with_hint(format!(
                    "the emitted value expands to more than the step budget of {} steps; \
                     avoid building payloads from many references to the same object",
                    self.limits.max_steps
                )),
                _ => diag,
            }
        })?;
        self.steps += visited;
        self.emitted = Some(captured);
        Ok(Value::Undefined)
    }

    fn number_arg(&self, v: &Value, b: Builtin, span: Span) -> Exec<f64> {
        match v {
            Value::Number(n) => Ok(*n),
            other => Err(self.error_at(
                span,
                format!(
                    "{} expects numbers, got {}",
                    builtin_name(b),
                    other.describe()
                ),
            )),
        }
    }

    fn function_arg(&self, v: Value, b: Builtin, span: Span) -> Exec<Value> {
        match v {
            Value::Function(_) | Value::Builtin(_) => Ok(v),
            other => Err(self.error_at(
                span,
                format!(
                    "{} expects a function, got {}",
                    builtin_name(b),
                    other.describe()
                ),
            )),
        }
    }

    fn own_entries(&self, v: &Value, b: Builtin, span: Span) -> Exec<Vec<(Rc<str>, Value)>> {
        match v {
            Value::Object(id) => Ok(self.heap.object(*id).to_vec()),
            Value::Array(id) => Ok(self
                .heap
                .array(*id)
                .iter()
                .enumerate()
                .map(|(i, v)| (Rc::from(i.to_string()), v.clone()))
                .collect()),
            other => Err(self.error_at(
                span,
                format!(
                    "{} expects an object, got {}",
                    builtin_name(b),
                    other.describe()
                ),
            )),
        }
    }

    // -- Array methods -------------------------------------------------------

    fn call_array_method(
        &mut self,
        m: ArrayMethod,
        id: HeapId,
        args: Vec<Value>,
        span: Span,
    ) -> Exec<Value> {
        let b = Builtin::Array(m, id);
        match m {
            ArrayMethod::Push => {
                for v in args {
                    let len = self.heap.array(id).len();
                    self.set_element(id, len, v, span)?;
                }
                Ok(Value::Number(self.heap.array(id).len() as f64))
            }
            ArrayMethod::Includes => {
                let needle = arg(&args, 0);
                Ok(Value::Bool(
                    self.heap.array(id).iter().any(|v| v.same_value_zero(&needle)),
                ))
            }
            ArrayMethod::IndexOf => {
                let needle = arg(&args, 0);
                let pos = self
                    .heap
                    .array(id)
                    .iter()
                    .position(|v| v.strict_equals(&needle));
                Ok(Value::Number(pos.map_or(-1.0, |p| p as f64)))
            }
            ArrayMethod::Join => {
                let sep = match arg(&args, 0) {
                    Value::Undefined => ",".to_owned(),
                    other => self.to_display(&other),
                };
                let parts: Vec<String> = self
                    .heap
                    .array(id)
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            self.to_display(v)
                        }
                    })
                    .collect();
                let joined = parts.join(&sep);
                self.charge(joined.len() / 16, span)?;
                Ok(Value::str(joined))
            }
            ArrayMethod::Slice => {
                let items = self.heap.array(id);
                let len = items.len();
                let start = self.relative_index(&arg(&args, 0), len, 0, b, span)?;
                let end = self.relative_index(&arg(&args, 1), len, len, b, span)?;
                let out = if start < end {
                    self.heap.array(id)[start..end].to_vec()
                } else {
                    Vec::new()
                };
                self.new_array(out, span)
            }
            ArrayMethod::Concat => {
                let mut out = self.heap.array(id).to_vec();
                for a in args {
                    match a {
                        Value::Array(other) => out.extend_from_slice(self.heap.array(other)),
                        v => out.push(v),
                    }
                }
                self.new_array(out, span)
            }
            ArrayMethod::Sort => {
                let cmp = match arg(&args, 0) {
                    Value::Undefined => None,
                    v => Some(self.function_arg(v, b, span)?),
                };
                let items = self.heap.array(id).to_vec();
                let sorted = self.sort_values(items, cmp.as_ref(), span)?;
                if let Some(slot) = self.heap.array_mut(id) {
                    *slot = sorted;
                }
                Ok(Value::Array(id))
            }
            ArrayMethod::Map | ArrayMethod::Filter | ArrayMethod::ForEach => {
                let f = self.function_arg(arg(&args, 0), b, span)?;
                let len = self.heap.array(id).len();
                let mut out = Vec::new();
                for i in 0..len {
                    let Some(item) = self.heap.array(id).get(i).cloned() else {
                        break;
                    };
                    let r = self.call(f.clone(), vec![item.clone(), Value::Number(i as f64)], span)?;
                    match m {
                        ArrayMethod::Map => out.push(r),
                        ArrayMethod::Filter if r.truthy() => out.push(item),
                        _ => {}
                    }
                }
                if m == ArrayMethod::ForEach {
                    Ok(Value::Undefined)
                } else {
                    self.new_array(out, span)
                }
            }
        }
    }

    fn relative_index(
        &self,
        v: &Value,
        len: usize,
        default: usize,
        b: Builtin,
        span: Span,
    ) -> Exec<usize> {
        let n = match v {
            Value::Undefined => return Ok(default),
            other => self.number_arg(other, b, span)?.trunc(),
        };
        Ok(if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            n.min(len as f64) as usize
        })
    }

    /// Stable insertion sort. Without a comparator, values compare by their
    /// string forms and `undefined` sorts last.
    fn sort_values(&mut self, items: Vec<Value>, cmp: Option<&Value>, span: Span) -> Exec<Vec<Value>> {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            let mut pos = out.len();
            while pos > 0 && self.sorts_before(&item, &out[pos - 1], cmp, span)? {
                pos -= 1;
            }
            out.insert(pos, item);
        }
        Ok(out)
    }

    fn sorts_before(&mut self, a: &Value, b: &Value, cmp: Option<&Value>, span: Span) -> Exec<bool> {
        match cmp {
            Some(f) => match self.call(f.clone(), vec![a.clone(), b.clone()], span)? {
                Value::Number(n) => Ok(n < 0.0),
                other => Err(self.error_at(
                    span,
                    format!("sort comparator must return a number, got {}", other.describe()),
                )),
            },
            None => Ok(match (a, b) {
                (Value::Undefined, _) => false,
                (_, Value::Undefined) => true,
                _ => self.to_display(a) < self.to_display(b),
            }),
        }
    }
}
