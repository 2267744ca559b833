//! Injected key/parameter registries.
//!
//! The registry is built once by the host, validated on construction and
//! never mutated afterwards. Every compiler stage receives it by reference.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One registered name with its stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub id: u32,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("registry JSON is malformed: {0}")]
    Malformed(String),

    #[error("{namespace} name '{name}' is not a valid identifier")]
    InvalidName { namespace: &'static str, name: String },

    #[error("duplicate {namespace} name '{name}'")]
    DuplicateName { namespace: &'static str, name: String },

    #[error("duplicate {namespace} id {id} (used by '{first}' and '{second}')")]
    DuplicateId {
        namespace: &'static str,
        id: u32,
        first: String,
        second: String,
    },
}

#[derive(Deserialize)]
struct RegistryDoc {
    #[serde(default)]
    keys: Vec<RegistryEntry>,
    #[serde(default)]
    params: Vec<RegistryEntry>,
}

/// Read-only name→id tables for row keys and request parameters.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    keys: BTreeMap<String, u32>,
    params: BTreeMap<String, u32>,
    key_ids: HashSet<u32>,
    param_ids: HashSet<u32>,
}

impl Registry {
    pub fn new(keys: Vec<RegistryEntry>, params: Vec<RegistryEntry>) -> Result<Self, RegistryError> {
        let (keys, key_ids) = build_table("key", keys)?;
        let (params, param_ids) = build_table("param", params)?;
        Ok(Registry {
            keys,
            params,
            key_ids,
            param_ids,
        })
    }

    /// Load from `{"keys":[{"name","id"}…],"params":[{"name","id"}…]}`.
    pub fn from_json_str(s: &str) -> Result<Self, RegistryError> {
        let doc: RegistryDoc =
            serde_json::from_str(s).map_err(|e| RegistryError::Malformed(e.to_string()))?;
        Registry::new(doc.keys, doc.params)
    }

    pub fn key_id(&self, name: &str) -> Option<u32> {
        self.keys.get(name).copied()
    }

    pub fn param_id(&self, name: &str) -> Option<u32> {
        self.params.get(name).copied()
    }

    pub fn has_key_id(&self, id: u32) -> bool {
        self.key_ids.contains(&id)
    }

    pub fn has_param_id(&self, id: u32) -> bool {
        self.param_ids.contains(&id)
    }

    /// Keys in name order.
    pub fn keys(&self) -> impl Iterator<Item = (&str, u32)> {
        self.keys.iter().map(|(n, id)| (n.as_str(), *id))
    }

    /// Params in name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, u32)> {
        self.params.iter().map(|(n, id)| (n.as_str(), *id))
    }

    pub fn suggest_key(&self, name: &str) -> Option<&str> {
        suggest(self.keys.keys(), name)
    }

    pub fn suggest_param(&self, name: &str) -> Option<&str> {
        suggest(self.params.keys(), name)
    }
}

fn build_table(
    namespace: &'static str,
    entries: Vec<RegistryEntry>,
) -> Result<(BTreeMap<String, u32>, HashSet<u32>), RegistryError> {
    let mut by_name = BTreeMap::new();
    let mut by_id: BTreeMap<u32, String> = BTreeMap::new();
    for entry in entries {
        if !is_identifier(&entry.name) {
            return Err(RegistryError::InvalidName {
                namespace,
                name: entry.name,
            });
        }
        if by_name.contains_key(&entry.name) {
            return Err(RegistryError::DuplicateName {
                namespace,
                name: entry.name,
            });
        }
        if let Some(first) = by_id.get(&entry.id) {
            return Err(RegistryError::DuplicateId {
                namespace,
                id: entry.id,
                first: first.clone(),
                second: entry.name,
            });
        }
        by_id.insert(entry.id, entry.name.clone());
        by_name.insert(entry.name, entry.id);
    }
    let ids = by_id.into_keys().collect();
    Ok((by_name, ids))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Nearest name within edit distance 2; ties go to the lexicographically
/// smaller name.
fn suggest<'a>(names: impl Iterator<Item = &'a String>, target: &str) -> Option<&'a str> {
    let mut best: Option<(usize, &'a str)> = None;
    for name in names {
        let d = edit_distance(name, target);
        if d > 2 {
            continue;
        }
        match best {
            Some((bd, _)) if bd <= d => {}
            _ => best = Some((d, name.as_str())),
        }
    }
    best.map(|(_, n)| n)
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, id: u32) -> RegistryEntry {
        RegistryEntry {
            name: name.to_owned(),
            id,
        }
    }

    #[test]
    fn loads_from_json() {
        let reg = Registry::from_json_str(
            r#"{"keys":[{"name":"final_score","id":1},{"name":"model_score_1","id":2}],
                "params":[{"name":"weight","id":7}]}"#,
        )
        .unwrap();
        assert_eq!(reg.key_id("final_score"), Some(1));
        assert_eq!(reg.param_id("weight"), Some(7));
        assert_eq!(reg.key_id("weight"), None);
        assert!(reg.has_key_id(2));
        assert!(!reg.has_param_id(2));
        let names: Vec<&str> = reg.keys().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["final_score", "model_score_1"]);
    }

    #[test]
    fn rejects_duplicate_names_and_ids() {
        let err = Registry::new(vec![entry("a", 1), entry("a", 2)], vec![]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));

        let err = Registry::new(vec![], vec![entry("a", 1), entry("b", 1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate param id 1 (used by 'a' and 'b')"
        );
    }

    #[test]
    fn same_id_in_different_namespaces_is_fine() {
        let reg = Registry::new(vec![entry("score", 1)], vec![entry("weight", 1)]).unwrap();
        assert!(reg.has_key_id(1));
        assert!(reg.has_param_id(1));
    }

    #[test]
    fn rejects_non_identifier_names() {
        let err = Registry::new(vec![entry("final-score", 1)], vec![]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName { .. }));
        assert!(Registry::new(vec![entry("1abc", 1)], vec![]).is_err());
    }

    #[test]
    fn suggestions_within_two_edits() {
        let reg = Registry::new(
            vec![entry("final_score", 1), entry("model_score_1", 2)],
            vec![entry("weight", 3)],
        )
        .unwrap();
        assert_eq!(reg.suggest_key("final_scor"), Some("final_score"));
        assert_eq!(reg.suggest_param("wieght"), Some("weight"));
        assert_eq!(reg.suggest_key("totally_different"), None);
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
