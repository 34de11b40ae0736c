use std::collections::HashMap;

use homestak_domain::{Manifest, Node, NodeKind, NodeName, ExecutionMode};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::GraphError;

/// Validated, topologically-ordered view of a manifest's node tree.
#[derive(Debug)]
pub struct ResolvedGraph {
    /// Node names in create order: every parent appears before its children.
    pub create_order: Vec<NodeName>,
}

impl ResolvedGraph {
    /// Destroy order is the reverse of create order: children torn down
    /// before their parents.
    pub fn destroy_order(&self) -> Vec<NodeName> {
        let mut order = self.create_order.clone();
        order.reverse();
        order
    }
}

/// Validate a manifest's node list and compute its create order.
///
/// Checks:
/// 1. Every `parent` reference resolves to a node in the same manifest.
/// 2. No duplicate node names.
/// 3. A `vm` node never parents another node.
/// 4. A `pve` node always uses push execution mode.
/// 5. The parent graph is acyclic.
pub fn validate(nodes: &[Node]) -> Result<ResolvedGraph, GraphError> {
    let mut errors: Vec<GraphError> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for n in nodes {
        if !seen.insert(&n.name) {
            errors.push(GraphError::DuplicateNodeName(n.name.clone()));
        }
    }

    let by_name: HashMap<&NodeName, &Node> = nodes.iter().map(|n| (&n.name, n)).collect();

    for n in nodes {
        if let Some(parent) = &n.parent {
            match by_name.get(parent) {
                None => errors.push(GraphError::UnknownParent {
                    node: n.name.clone(),
                    parent: parent.clone(),
                }),
                Some(parent_node) => {
                    if parent_node.kind == NodeKind::Vm {
                        errors.push(GraphError::VmCannotParent(parent.clone()));
                    }
                }
            }
        }
        if n.kind == NodeKind::Pve && n.execution.mode != ExecutionMode::Push {
            errors.push(GraphError::PveRequiresPush(n.name.clone()));
        }
    }

    if !errors.is_empty() {
        if errors.len() == 1 {
            return Err(errors.remove(0));
        }
        return Err(GraphError::Multiple(errors));
    }

    // Build parent -> child edges and topologically sort (parents first).
    let mut graph: DiGraph<&NodeName, ()> = DiGraph::new();
    let node_map: HashMap<&NodeName, NodeIndex> =
        nodes.iter().map(|n| (&n.name, graph.add_node(&n.name))).collect();

    for n in nodes {
        if let Some(parent) = &n.parent {
            let from = node_map[parent];
            let to = node_map[&n.name];
            graph.add_edge(from, to, ());
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(GraphError::CycleDetected);
    }

    let topo = petgraph::algo::toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;
    let create_order = topo.into_iter().map(|idx| graph[idx].clone()).collect();

    Ok(ResolvedGraph { create_order })
}

/// Extract the subtree delegated to a child hypervisor: `parent`'s direct
/// children become the new manifest's roots (their `parent` reference
/// cleared) and every transitive descendant is carried along with its
/// `parent` reference preserved. `parent` itself is not part of the
/// extracted manifest — it is the target the subtree is delegated *to*.
pub fn extract_subtree(manifest: &Manifest, parent: &NodeName) -> Result<Manifest, GraphError> {
    let by_name: HashMap<&NodeName, &Node> =
        manifest.nodes.iter().map(|n| (&n.name, n)).collect();
    if !by_name.contains_key(parent) {
        return Err(GraphError::UnknownNode(parent.clone()));
    }

    let mut keep: std::collections::HashSet<NodeName> = std::collections::HashSet::new();
    for n in &manifest.nodes {
        if n.parent.as_ref() == Some(parent) {
            keep.insert(n.name.clone());
        }
    }
    // Fixed point: repeatedly add children of anything already kept.
    loop {
        let before = keep.len();
        for n in &manifest.nodes {
            if let Some(p) = &n.parent {
                if keep.contains(p) {
                    keep.insert(n.name.clone());
                }
            }
        }
        if keep.len() == before {
            break;
        }
    }

    let nodes: Vec<Node> = manifest
        .nodes
        .iter()
        .filter(|n| keep.contains(&n.name))
        .cloned()
        .map(|mut n| {
            if n.parent.as_ref() == Some(parent) {
                n.parent = None;
            }
            n
        })
        .collect();

    Ok(Manifest {
        schema_version: manifest.schema_version,
        name: format!("{}@{}", manifest.name, parent.as_str()),
        settings: manifest.settings.clone(),
        nodes,
    })
}
