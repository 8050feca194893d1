//! Dependency graph over specification nodes.
//!
//! Edges point from dependency to dependent: parent entity → fact,
//! lookup/choice-dictionary source → owning node, effect table → owning
//! node. Self-references (a column looking up its own node's primary key)
//! do not produce edges; they are resolved by two-pass materialization
//! inside the executor.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::spec::{GeneratorSpec, ModifierSpec, Specification};

/// Why an edge exists, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Parent,
    Lookup,
    ChoiceDictionary,
    Effect,
}

pub struct DependencyGraph {
    pub graph: DiGraph<String, EdgeKind>,
    pub node_indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the dependency graph from a validated specification.
    pub fn from_spec(spec: &Specification) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();

        for node in &spec.nodes {
            let idx = graph.add_node(node.name.clone());
            node_indices.insert(node.name.clone(), idx);
        }

        let add_edge = |graph: &mut DiGraph<String, EdgeKind>,
                            from: &str,
                            to: &str,
                            kind: EdgeKind| {
            if from == to {
                return;
            }
            if let (Some(&f), Some(&t)) = (node_indices.get(from), node_indices.get(to)) {
                graph.add_edge(f, t, kind);
            }
        };

        for node in &spec.nodes {
            for parent in &node.parents {
                add_edge(&mut graph, parent, &node.name, EdgeKind::Parent);
            }
            for effect in &node.effects {
                add_edge(&mut graph, &effect.table, &node.name, EdgeKind::Effect);
            }
            for column in &node.columns {
                match &column.generator {
                    GeneratorSpec::Lookup(args) => {
                        add_edge(&mut graph, &args.from.table, &node.name, EdgeKind::Lookup);
                    }
                    GeneratorSpec::Choice(args) => {
                        if let Some(reference) = &args.choices_ref {
                            add_edge(
                                &mut graph,
                                &reference.table,
                                &node.name,
                                EdgeKind::ChoiceDictionary,
                            );
                        }
                    }
                    _ => {}
                }
                for modifier in &column.modifiers {
                    if let ModifierSpec::Effect(effect) = modifier {
                        add_edge(&mut graph, &effect.table, &node.name, EdgeKind::Effect);
                    }
                }
            }
        }

        Self {
            graph,
            node_indices,
        }
    }

    pub fn node_name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
