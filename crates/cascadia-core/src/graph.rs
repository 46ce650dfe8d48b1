use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::registry::Registry;

/// Which associations count as dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyEdges {
    /// Every association, constrained or not.
    All,
    /// Only associations that produce a physical constraint.
    Constrained,
}

/// Summary of association graph structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencySummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Parents-first ordering of entity types, or the nodes stuck in a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyReport {
    pub summary: DependencySummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

impl DependencyReport {
    pub fn is_acyclic(&self) -> bool {
        self.topo_order.is_some()
    }
}

/// Build a deterministic dependency report for the declared entity types.
///
/// An edge runs from the referenced (source) entity to the entity holding the
/// foreign-key column. Self-references are not edges.
pub fn build_dependency_report(registry: &Registry, edges: DependencyEdges) -> DependencyReport {
    let graph = build_adjacency(registry, edges);
    let nodes = graph.len();
    let edge_count = graph.values().map(|targets| targets.len()).sum();
    let summary = DependencySummary {
        nodes,
        edges: edge_count,
    };

    match toposort(&graph) {
        Ok(order) => DependencyReport {
            summary,
            topo_order: Some(order),
            cycle: None,
        },
        Err(cycle) => DependencyReport {
            summary,
            topo_order: None,
            cycle: Some(cycle),
        },
    }
}

fn build_adjacency(registry: &Registry, edges: DependencyEdges) -> BTreeMap<String, BTreeSet<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for entity in registry.entity_types() {
        graph.entry(entity.name.clone()).or_default();
    }

    for assoc in registry.associations() {
        if assoc.is_self_reference() {
            continue;
        }
        if edges == DependencyEdges::Constrained && !assoc.is_constrained() {
            continue;
        }
        graph
            .entry(assoc.source.clone())
            .or_default()
            .insert(assoc.target.clone());
    }

    graph
}

fn toposort(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> =
        graph.keys().map(|node| (node.as_str(), 0)).collect();
    for targets in graph.values() {
        for target in targets {
            *indegree.entry(target.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());

        let Some(targets) = graph.get(node) else {
            continue;
        };
        for target in targets {
            if let Some(count) = indegree.get_mut(target.as_str()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert(target.as_str());
                }
            }
        }
    }

    if order.len() == indegree.len() {
        Ok(order)
    } else {
        Err(indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(node, _)| node.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{AssociationOptions, Cardinality, ReferentialAction};
    use crate::entity::Attribute;

    fn registry(names: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for name in names {
            registry
                .define_entity_type(*name, vec![Attribute::string("label")])
                .unwrap();
        }
        registry
    }

    fn cascade() -> AssociationOptions {
        AssociationOptions::default().on_delete(ReferentialAction::Cascade)
    }

    #[test]
    fn orders_parents_first() {
        let mut registry = registry(&["Task", "User", "Comment"]);
        registry
            .declare_association("User", "Task", Cardinality::OneToMany, cascade())
            .unwrap();
        registry
            .declare_association("Task", "Comment", Cardinality::OneToMany, cascade())
            .unwrap();

        let report = build_dependency_report(&registry, DependencyEdges::Constrained);
        assert_eq!(report.summary, DependencySummary { nodes: 3, edges: 2 });
        assert_eq!(
            report.topo_order.expect("acyclic"),
            vec!["User".to_string(), "Task".to_string(), "Comment".to_string()]
        );
    }

    #[test]
    fn reports_cycle_between_constrained_tables() {
        let mut registry = registry(&["Team", "User", "Audit"]);
        registry
            .declare_association("User", "Team", Cardinality::OneToMany, cascade())
            .unwrap();
        registry
            .declare_association("Team", "User", Cardinality::OneToMany, cascade())
            .unwrap();

        let report = build_dependency_report(&registry, DependencyEdges::Constrained);
        assert!(!report.is_acyclic());
        assert_eq!(
            report.cycle.expect("cycle"),
            vec!["Team".to_string(), "User".to_string()]
        );
    }

    #[test]
    fn unconstrained_edges_only_count_when_requested() {
        let mut registry = registry(&["User", "Task"]);
        registry
            .declare_association(
                "Task",
                "User",
                Cardinality::OneToMany,
                AssociationOptions::default(),
            )
            .unwrap();

        let constrained = build_dependency_report(&registry, DependencyEdges::Constrained);
        assert_eq!(constrained.summary.edges, 0);
        assert_eq!(
            constrained.topo_order.expect("acyclic"),
            vec!["Task".to_string(), "User".to_string()]
        );

        let all = build_dependency_report(&registry, DependencyEdges::All);
        assert_eq!(all.summary.edges, 1);
        assert_eq!(
            all.topo_order.expect("acyclic"),
            vec!["Task".to_string(), "User".to_string()]
        );
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let mut registry = registry(&["Employee"]);
        registry
            .declare_association(
                "Employee",
                "Employee",
                Cardinality::OneToMany,
                AssociationOptions::default()
                    .foreign_key("ManagerId")
                    .on_delete(ReferentialAction::SetNull),
            )
            .unwrap();

        let report = build_dependency_report(&registry, DependencyEdges::All);
        assert!(report.is_acyclic());
        assert_eq!(report.summary.edges, 0);
    }
}
