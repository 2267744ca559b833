//! Conversion of the emitted sandbox value into plain JSON.
//!
//! The walk tracks the heap ids on the current path: meeting one again is a
//! reference cycle, while a value shared between two branches is copied.
//! Every visited value costs one step of the caller's remaining budget, so
//! widely shared graphs fail instead of expanding without bound.

use super::value::{number_to_string, Heap, HeapId, Value};
use serde_json::{Map, Number};
use std::collections::HashSet;

/// Deepest nesting the walk follows.
const MAX_DEPTH: usize = 256;

/// Largest magnitude below which integral numbers are emitted as integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(super) enum CaptureError {
    #[error("emitted value contains a reference cycle at {path}")]
    Cycle { path: String },

    #[error("emitted value is not serializable at {path}: {reason}")]
    Unserializable { path: String, reason: String },

    #[error("step budget exhausted while capturing the emitted value at {path}")]
    Budget { path: String },
}

/// Convert `value` to JSON, visiting at most `budget` values. Returns the
/// JSON and the number of values visited.
pub(super) fn capture(
    heap: &Heap<'_>,
    value: &Value,
    budget: u64,
) -> Result<(serde_json::Value, u64), CaptureError> {
    let mut walker = Walker {
        heap,
        on_path: HashSet::new(),
        path: String::from("$"),
        remaining: budget,
        visited: 0,
    };
    let json = walker.walk(value)?;
    Ok((json, walker.visited))
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn number(n: f64) -> Option<serde_json::Value> {
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Some(serde_json::Value::from(n as i64));
    }
    Number::from_f64(n).map(serde_json::Value::Number)
}

struct Walker<'h, 'a> {
    heap: &'h Heap<'a>,
    on_path: HashSet<HeapId>,
    path: String,
    remaining: u64,
    visited: u64,
}

impl Walker<'_, '_> {
    fn unserializable(&self, reason: impl Into<String>) -> CaptureError {
        CaptureError::Unserializable {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn enter(&mut self, id: HeapId) -> Result<(), CaptureError> {
        if self.on_path.len() >= MAX_DEPTH {
            return Err(self.unserializable(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        if !self.on_path.insert(id) {
            return Err(CaptureError::Cycle {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn walk(&mut self, value: &Value) -> Result<serde_json::Value, CaptureError> {
        if self.remaining == 0 {
            return Err(CaptureError::Budget {
                path: self.path.clone(),
            });
        }
        self.remaining -= 1;
        self.visited += 1;
        let heap = self.heap;
        match value {
            Value::Undefined => Err(self.unserializable("undefined")),
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Number(n) => number(*n)
                .ok_or_else(|| self.unserializable(format!("non-finite number {}", number_to_string(*n)))),
            Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
            Value::Function(_) => Err(self.unserializable("function")),
            Value::Builtin(_) => Err(self.unserializable("opaque host handle")),
            Value::Object(id) => {
                self.enter(*id)?;
                let mut map = Map::new();
                for (key, v) in heap.object(*id) {
                    // Absent in JSON, like a missing property.
                    if *v == Value::Undefined {
                        continue;
                    }
                    let len = self.path.len();
                    if is_identifier(key) {
                        self.path.push('.');
                        self.path.push_str(key);
                    } else {
                        self.path.push('[');
                        self.path.push_str(&serde_json::Value::String(key.to_string()).to_string());
                        self.path.push(']');
                    }
                    let json = self.walk(v)?;
                    self.path.truncate(len);
                    map.insert(key.to_string(), json);
                }
                self.on_path.remove(id);
                Ok(serde_json::Value::Object(map))
            }
            Value::Array(id) => {
                self.enter(*id)?;
                let mut out = Vec::new();
                for (i, v) in heap.array(*id).iter().enumerate() {
                    let len = self.path.len();
                    self.path.push_str(&format!("[{}]", i));
                    out.push(self.walk(v)?);
                    self.path.truncate(len);
                }
                self.on_path.remove(id);
                Ok(serde_json::Value::Array(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(heap: &mut Heap<'_>, entries: Vec<(&str, Value)>) -> Value {
        heap.alloc_object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
            .unwrap()
    }

    #[test]
    fn plain_data_converts() {
        let mut heap = Heap::new(100);
        let inner = heap
            .alloc_array(vec![Value::Number(1.0), Value::Number(0.25), Value::Null])
            .unwrap();
        let root = obj(
            &mut heap,
            vec![
                ("a", inner),
                ("b", Value::str("x")),
                ("skip", Value::Undefined),
                ("t", Value::Bool(true)),
            ],
        );
        let (v, visited) = capture(&heap, &root, 1_000).unwrap();
        assert_eq!(v, json!({"a": [1, 0.25, null], "b": "x", "t": true}));
        assert_eq!(visited, 7);
        assert!(v["a"][0].is_i64());
    }

    #[test]
    fn shared_subtrees_are_not_cycles() {
        let mut heap = Heap::new(100);
        let shared = obj(&mut heap, vec![("k", Value::Number(1.0))]);
        let root = obj(&mut heap, vec![("x", shared.clone()), ("y", shared)]);
        let (v, _) = capture(&heap, &root, 1_000).unwrap();
        assert_eq!(v, json!({"x": {"k": 1}, "y": {"k": 1}}));
    }

    #[test]
    fn diamond_chain_exhausts_the_budget() {
        let mut heap = Heap::new(1_000);
        let mut node = obj(&mut heap, vec![("leaf", Value::Number(1.0))]);
        for _ in 0..40 {
            node = obj(&mut heap, vec![("a", node.clone()), ("b", node)]);
        }
        let err = capture(&heap, &node, 10_000).unwrap_err();
        assert!(matches!(err, CaptureError::Budget { .. }));
        assert!(err.to_string().starts_with("step budget exhausted while capturing"));

        // Shallow sharing fits and costs one step per visited value.
        let mut node = obj(&mut heap, vec![("leaf", Value::Number(1.0))]);
        for _ in 0..3 {
            node = obj(&mut heap, vec![("a", node.clone()), ("b", node)]);
        }
        let (_, visited) = capture(&heap, &node, 10_000).unwrap();
        assert_eq!(visited, 23);
    }

    #[test]
    fn cycle_reports_path() {
        let mut heap = Heap::new(100);
        let root = obj(&mut heap, vec![]);
        let Value::Object(id) = root else {
            panic!("expected object")
        };
        let list = heap.alloc_array(vec![root.clone()]).unwrap();
        heap.set_property(id, "items", list).unwrap();
        let err = capture(&heap, &root, 1_000).unwrap_err();
        assert_eq!(
            err,
            CaptureError::Cycle {
                path: "$.items[0]".to_owned()
            }
        );
    }

    #[test]
    fn rejects_non_data() {
        let mut heap = Heap::new(100);
        let root = obj(
            &mut heap,
            vec![("my.cap", Value::Builtin(super::super::value::Builtin::Emit))],
        );
        assert_eq!(
            capture(&heap, &root, 1_000).unwrap_err().to_string(),
            "emitted value is not serializable at $[\"my.cap\"]: opaque host handle"
        );

        let arr = heap
            .alloc_array(vec![Value::Number(f64::INFINITY)])
            .unwrap();
        assert_eq!(
            capture(&heap, &arr, 1_000).unwrap_err().to_string(),
            "emitted value is not serializable at $[0]: non-finite number Infinity"
        );

        let holes = heap.alloc_array(vec![Value::Undefined]).unwrap();
        assert!(capture(&heap, &holes, 1_000).is_err());
    }
}
