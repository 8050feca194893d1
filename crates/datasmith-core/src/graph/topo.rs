//! Layered topological sort.
//!
//! Emits the plan as a list of generations: maximal sets of nodes with no
//! outstanding dependencies, produced in a single parallel batch. Nodes
//! within a generation are ordered as declared in the specification so the
//! plan itself is deterministic.

use std::collections::HashMap;

use crate::error::{DatasmithError, Result};
use crate::graph::dag::DependencyGraph;
use crate::spec::Specification;

/// The ordered plan: one entry per DAG generation.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub generations: Vec<Vec<String>>,
}

impl GenerationPlan {
    /// Flattened node order (parents before children).
    pub fn flat_order(&self) -> Vec<&str> {
        self.generations
            .iter()
            .flat_map(|g| g.iter().map(|s| s.as_str()))
            .collect()
    }
}

/// Plan the specification into topological generations.
///
/// Fails with [`DatasmithError::CyclicPlan`] naming the unresolved nodes
/// when the inferred dependency graph contains a cycle.
pub fn plan(spec: &Specification) -> Result<GenerationPlan> {
    let graph = DependencyGraph::from_spec(spec);

    let mut indegree: HashMap<&str, usize> = spec
        .nodes
        .iter()
        .map(|n| (n.name.as_str(), 0usize))
        .collect();
    for edge in graph.graph.edge_indices() {
        if let Some((_, target)) = graph.graph.edge_endpoints(edge) {
            if let Some(d) = indegree.get_mut(graph.node_name(target)) {
                *d += 1;
            }
        }
    }

    let mut remaining: Vec<&str> = spec.nodes.iter().map(|n| n.name.as_str()).collect();
    let mut generations = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|name| indegree.get(name).copied().unwrap_or(0) == 0)
            .collect();

        if ready.is_empty() {
            let mut nodes = remaining.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            nodes.sort();
            return Err(DatasmithError::CyclicPlan {
                nodes: nodes.join(", "),
            });
        }

        for name in &ready {
            if let Some(&idx) = graph.node_indices.get(*name) {
                for neighbor in graph.graph.neighbors(idx) {
                    let neighbor_name = graph.node_name(neighbor);
                    if let Some(d) = indegree.get_mut(neighbor_name) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }

        remaining.retain(|name| !ready.contains(name));
        generations.push(ready.into_iter().map(|s| s.to_string()).collect());
    }

    Ok(GenerationPlan { generations })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_from(nodes_json: &str) -> Specification {
        let json = format!(
            r#"{{
            "version": "1",
            "metadata": {{"name": "t"}},
            "timeframe": {{"start": "2024-01-01T00:00:00Z",
                          "end": "2024-02-01T00:00:00Z", "frequency": "day"}},
            "nodes": {}
        }}"#,
            nodes_json
        );
        Specification::from_json(&json).unwrap()
    }

    #[test]
    fn test_parents_come_in_earlier_generations() {
        let spec = spec_from(
            r#"[
            {"name": "user", "kind": "entity", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]},
            {"name": "event", "kind": "fact", "primary_key": "id",
             "parents": ["user"],
             "fanout": {"distribution": "uniform", "min": 1, "max": 2, "clamp": [0, 5]},
             "columns": [
                {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "user_id", "type": "integer",
                 "generator": {"lookup": {"from": "user.id"}}}]}
        ]"#,
        );
        let plan = plan(&spec).unwrap();
        assert_eq!(plan.generations.len(), 2);
        assert_eq!(plan.generations[0], vec!["user"]);
        assert_eq!(plan.generations[1], vec!["event"]);
    }

    #[test]
    fn test_independent_nodes_share_a_generation() {
        let spec = spec_from(
            r#"[
            {"name": "a", "kind": "entity", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]},
            {"name": "b", "kind": "entity", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]}
        ]"#,
        );
        let plan = plan(&spec).unwrap();
        assert_eq!(plan.generations.len(), 1);
        assert_eq!(plan.generations[0], vec!["a", "b"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        // a looks up b, b looks up a
        let spec = spec_from(
            r#"[
            {"name": "a", "kind": "entity", "primary_key": "id",
             "columns": [
                {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "other", "type": "integer",
                 "generator": {"lookup": {"from": "b.id"}}}]},
            {"name": "b", "kind": "entity", "primary_key": "id",
             "columns": [
                {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "other", "type": "integer",
                 "generator": {"lookup": {"from": "a.id"}}}]}
        ]"#,
        );
        let err = plan(&spec).unwrap_err();
        match err {
            DatasmithError::CyclicPlan { nodes } => {
                assert!(nodes.contains('a') && nodes.contains('b'));
            }
            other => panic!("expected CyclicPlan, got {:?}", other),
        }
    }

    #[test]
    fn test_flat_order_respects_dependencies() {
        let spec = spec_from(
            r#"[
            {"name": "event", "kind": "fact", "primary_key": "id",
             "parents": ["user"],
             "fanout": {"distribution": "poisson", "lambda": 1.0, "clamp": [0, 3]},
             "columns": [
                {"name": "id", "type": "integer", "generator": {"sequence": {}}},
                {"name": "user_id", "type": "integer",
                 "generator": {"lookup": {"from": "user.id"}}}]},
            {"name": "user", "kind": "entity", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer", "generator": {"sequence": {}}}]}
        ]"#,
        );
        let plan = plan(&spec).unwrap();
        let order = plan.flat_order();
        let user_pos = order.iter().position(|n| *n == "user").unwrap();
        let event_pos = order.iter().position(|n| *n == "event").unwrap();
        assert!(user_pos < event_pos);
    }
}
