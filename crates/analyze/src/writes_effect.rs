//! Key-effect algebra: which row keys a task (or subgraph) writes.
//!
//! Evaluation only ever sees compile/link-time constants. A request-time
//! parameter is simply absent from the binding environment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Declarative write-set descriptor attached to a task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WritesEffectExpr {
    Keys {
        key_ids: Vec<u32>,
    },
    FromParam {
        param: String,
    },
    SwitchEnum {
        param: String,
        cases: BTreeMap<String, WritesEffectExpr>,
    },
    Union {
        items: Vec<WritesEffectExpr>,
    },
}

impl WritesEffectExpr {
    pub fn keys(key_ids: impl IntoIterator<Item = u32>) -> Self {
        WritesEffectExpr::Keys {
            key_ids: key_ids.into_iter().collect(),
        }
    }

    pub fn from_param(param: &str) -> Self {
        WritesEffectExpr::FromParam {
            param: param.to_owned(),
        }
    }

    pub fn switch_enum<'a>(
        param: &str,
        cases: impl IntoIterator<Item = (&'a str, WritesEffectExpr)>,
    ) -> Self {
        WritesEffectExpr::SwitchEnum {
            param: param.to_owned(),
            cases: cases.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
        }
    }

    pub fn union(items: Vec<WritesEffectExpr>) -> Self {
        WritesEffectExpr::Union { items }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Exact,
    May,
    Unknown,
}

/// Evaluation result. `keys` is sorted and deduplicated, and empty for
/// [`EffectKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritesEffect {
    pub kind: EffectKind,
    pub keys: Vec<u32>,
}

impl WritesEffect {
    pub fn exact(keys: impl IntoIterator<Item = u32>) -> Self {
        WritesEffect {
            kind: EffectKind::Exact,
            keys: normalize(keys),
        }
    }

    pub fn may(keys: impl IntoIterator<Item = u32>) -> Self {
        WritesEffect {
            kind: EffectKind::May,
            keys: normalize(keys),
        }
    }

    pub fn unknown() -> Self {
        WritesEffect {
            kind: EffectKind::Unknown,
            keys: Vec::new(),
        }
    }

    /// The proven write set. Defined only for `Exact`.
    pub fn writes_exact(&self) -> Option<&[u32]> {
        match self.kind {
            EffectKind::Exact => Some(&self.keys),
            _ => None,
        }
    }
}

fn normalize(keys: impl IntoIterator<Item = u32>) -> Vec<u32> {
    keys.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// A constant parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectBinding {
    KeyId(u32),
    Enum(String),
}

/// Parameter name → constant value.
pub type EffectEnv = BTreeMap<String, EffectBinding>;

/// Known bounded domains of enum-valued parameters.
pub type EnumDomains = BTreeMap<String, Vec<String>>;

/// Bind a node's params: integers in `u32` range as key ids, strings as
/// enum values. Anything else stays unbound.
pub fn env_from_params(params: &Map<String, Value>) -> EffectEnv {
    let mut env = EffectEnv::new();
    for (name, value) in params {
        let binding = match value {
            Value::Number(n) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
                Some(id) => EffectBinding::KeyId(id),
                None => continue,
            },
            Value::String(s) => EffectBinding::Enum(s.clone()),
            _ => continue,
        };
        env.insert(name.clone(), binding);
    }
    env
}

/// Evaluate `expr` under `env`.
pub fn eval_writes(expr: &WritesEffectExpr, env: &EffectEnv, domains: &EnumDomains) -> WritesEffect {
    match expr {
        WritesEffectExpr::Keys { key_ids } => WritesEffect::exact(key_ids.iter().copied()),
        WritesEffectExpr::FromParam { param } => match env.get(param) {
            Some(EffectBinding::KeyId(id)) => WritesEffect::exact([*id]),
            _ => WritesEffect::unknown(),
        },
        WritesEffectExpr::SwitchEnum { param, cases } => match env.get(param) {
            Some(EffectBinding::Enum(value)) => match cases.get(value) {
                Some(case) => eval_writes(case, env, domains),
                None => WritesEffect::unknown(),
            },
            Some(EffectBinding::KeyId(_)) => WritesEffect::unknown(),
            None => {
                let covered = domains
                    .get(param)
                    .map_or(false, |domain| domain.iter().all(|v| cases.contains_key(v)));
                if !covered {
                    return WritesEffect::unknown();
                }
                let mut keys = BTreeSet::new();
                for case in cases.values() {
                    let r = eval_writes(case, env, domains);
                    if r.kind == EffectKind::Unknown {
                        return WritesEffect::unknown();
                    }
                    keys.extend(r.keys);
                }
                WritesEffect::may(keys)
            }
        },
        WritesEffectExpr::Union { items } => {
            union_effects(items.iter().map(|item| eval_writes(item, env, domains)))
        }
    }
}

/// Combine already-evaluated effects: `Unknown` absorbs, all-`Exact` stays
/// `Exact`, anything else is `May`. The empty union is `Exact({})`.
pub fn union_effects(effects: impl IntoIterator<Item = WritesEffect>) -> WritesEffect {
    let mut keys = BTreeSet::new();
    let mut all_exact = true;
    for effect in effects {
        match effect.kind {
            EffectKind::Unknown => return WritesEffect::unknown(),
            EffectKind::May => all_exact = false,
            EffectKind::Exact => {}
        }
        keys.extend(effect.keys);
    }
    if all_exact {
        WritesEffect::exact(keys)
    } else {
        WritesEffect::may(keys)
    }
}
