//! Per-node write-effect report and strict-shape enforcement.

use crate::capabilities::capabilities_digest;
use crate::catalog::TaskCatalog;
use crate::error::AnalysisError;
use crate::writes_effect::{env_from_params, eval_writes, union_effects, EffectKind, WritesEffect};
use rankplan_ir::PlanArtifact;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub op: String,
    pub writes_eval: WritesEffect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanInfo {
    pub plan_name: String,
    pub capabilities_digest: String,
    pub nodes: Vec<NodeInfo>,
}

impl PlanInfo {
    pub fn node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

/// Evaluate every node's write effect and check strict-shape nodes.
pub fn plan_info(artifact: &PlanArtifact, catalog: &TaskCatalog) -> Result<PlanInfo, AnalysisError> {
    let index: HashMap<&str, usize> = artifact
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.node_id.as_str(), i))
        .collect();

    let mut nodes = Vec::with_capacity(artifact.nodes.len());
    for node in &artifact.nodes {
        let spec = catalog.get(&node.op).ok_or_else(|| AnalysisError::UnknownOp {
            node_id: node.node_id.clone(),
            op: node.op.clone(),
        })?;
        for input in &node.inputs {
            if !index.contains_key(input.as_str()) {
                return Err(AnalysisError::UnknownNode {
                    node_id: node.node_id.clone(),
                    input: input.clone(),
                });
            }
        }
        let env = env_from_params(&node.params);
        let writes_eval = eval_writes(&spec.effective_writes(), &env, &spec.enum_domains);
        nodes.push(NodeInfo {
            node_id: node.node_id.clone(),
            op: node.op.clone(),
            writes_eval,
        });
    }

    for (i, node) in artifact.nodes.iter().enumerate() {
        let strict = catalog.get(&node.op).map_or(false, |s| s.strict_shape);
        if strict {
            check_strict_shape(artifact, &index, &nodes, i)?;
        }
    }

    tracing::debug!(plan = %artifact.plan_name, nodes = nodes.len(), "writes evaluated");
    Ok(PlanInfo {
        plan_name: artifact.plan_name.clone(),
        capabilities_digest: capabilities_digest(&artifact.capabilities_required, &artifact.extensions),
        nodes,
    })
}

/// Ancestors of `start`, including itself.
fn ancestors(artifact: &PlanArtifact, index: &HashMap<&str, usize>, start: usize) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if !seen.insert(i) {
            continue;
        }
        for input in &artifact.nodes[i].inputs {
            if let Some(&j) = index.get(input.as_str()) {
                stack.push(j);
            }
        }
    }
    seen
}

fn check_strict_shape(
    artifact: &PlanArtifact,
    index: &HashMap<&str, usize>,
    infos: &[NodeInfo],
    at: usize,
) -> Result<(), AnalysisError> {
    let node = &artifact.nodes[at];
    let fail = |message: String| AnalysisError::StrictShape {
        node_id: node.node_id.clone(),
        op: node.op.clone(),
        message,
    };

    let sides: Vec<BTreeSet<usize>> = node
        .inputs
        .iter()
        .filter_map(|input| index.get(input.as_str()))
        .map(|&j| ancestors(artifact, index, j))
        .collect();

    let mut proven: Option<(&str, Vec<u32>)> = None;
    for (k, side) in sides.iter().enumerate() {
        // Nodes shared with another side write the same keys on both.
        let exclusive = side.iter().filter(|j| {
            sides
                .iter()
                .enumerate()
                .all(|(other, set)| other == k || !set.contains(*j))
        });
        let effect = union_effects(exclusive.map(|&j| infos[j].writes_eval.clone()));
        let input = node.inputs[k].as_str();
        let keys = match effect.kind {
            EffectKind::Exact => effect.keys,
            EffectKind::May => {
                return Err(fail(format!(
                    "input '{}' may write {:?}, which is not proven",
                    input, effect.keys
                )))
            }
            EffectKind::Unknown => {
                return Err(fail(format!("input '{}' writes an unknown key set", input)))
            }
        };
        if let Some((first, first_keys)) = &proven {
            if *first_keys != keys {
                return Err(fail(format!(
                    "input '{}' writes {:?} but input '{}' writes {:?}",
                    first, first_keys, input, keys
                )));
            }
            continue;
        }
        proven = Some((input, keys));
    }
    Ok(())
}
