//! Transition table and graph checks
//!
//! Every edge is unconditional. Stages that cannot run because an input is
//! missing are skipped by the executor, never rerouted.

use super::Node;
use crate::error::{QueryChartError, QueryChartResult};
use std::collections::{BTreeSet, HashMap};

/// Directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Node,
    pub to: Node,
}

const fn edge(from: Node, to: Node) -> Transition {
    Transition { from, to }
}

// ============================================================================
// Question pipeline
// ============================================================================

pub const TRANSITIONS: &[Transition] = &[
    edge(Node::Start, Node::ParseQuestion),
    edge(Node::ParseQuestion, Node::GetUniqueNouns),
    edge(Node::GetUniqueNouns, Node::GenerateSql),
    edge(Node::GenerateSql, Node::ValidateAndFixSql),
    edge(Node::ValidateAndFixSql, Node::ExecuteSql),
    // Fan-out: both branches read the post-execution state
    edge(Node::ExecuteSql, Node::FormatResults),
    edge(Node::ExecuteSql, Node::ChooseVisualization),
    edge(Node::ChooseVisualization, Node::FormatDataForVisualization),
    edge(Node::FormatResults, Node::End),
    edge(Node::FormatDataForVisualization, Node::End),
];

// ============================================================================
// Validation
// ============================================================================

/// Check that `transitions` form a single-entry acyclic graph ending at `End`
///
/// - every node is reachable from `Start`
/// - no cycles
/// - only `End` may have more than one predecessor (branches never re-join elsewhere)
/// - every non-terminal node is in `registered`
pub fn validate_graph(transitions: &[Transition], registered: &BTreeSet<Node>) -> QueryChartResult<()> {
    let mut adjacency: HashMap<Node, Vec<Node>> = HashMap::new();
    let mut in_degree: HashMap<Node, usize> = HashMap::new();
    for t in transitions {
        adjacency.entry(t.from).or_default().push(t.to);
        *in_degree.entry(t.to).or_default() += 1;
    }

    for (node, degree) in &in_degree {
        if *node != Node::End && *degree > 1 {
            return Err(QueryChartError::InvalidGraph(format!(
                "node '{}' has {} predecessors",
                node, degree
            )));
        }
        if *node == Node::Start {
            return Err(QueryChartError::InvalidGraph(
                "Start must not have predecessors".to_string(),
            ));
        }
    }

    // Depth-first walk from Start; a node revisited while on the stack is a cycle
    let mut visited = BTreeSet::new();
    let mut on_stack = BTreeSet::new();
    visit(Node::Start, &adjacency, &mut visited, &mut on_stack)?;

    for t in transitions {
        for node in [t.from, t.to] {
            if !visited.contains(&node) {
                return Err(QueryChartError::InvalidGraph(format!(
                    "node '{}' is unreachable from Start",
                    node
                )));
            }
        }
    }
    if !visited.contains(&Node::End) {
        return Err(QueryChartError::InvalidGraph(
            "End is unreachable from Start".to_string(),
        ));
    }

    if let Some(missing) = visited
        .iter()
        .find(|node| !node.is_terminal() && !registered.contains(node))
    {
        return Err(QueryChartError::InvalidGraph(format!(
            "no stage registered for node '{}'",
            missing
        )));
    }

    Ok(())
}

fn visit(
    node: Node,
    adjacency: &HashMap<Node, Vec<Node>>,
    visited: &mut BTreeSet<Node>,
    on_stack: &mut BTreeSet<Node>,
) -> QueryChartResult<()> {
    if on_stack.contains(&node) {
        return Err(QueryChartError::InvalidGraph(format!(
            "cycle through node '{}'",
            node
        )));
    }
    if !visited.insert(node) {
        return Ok(());
    }

    on_stack.insert(node);
    for next in adjacency.get(&node).into_iter().flatten() {
        visit(*next, adjacency, visited, on_stack)?;
    }
    on_stack.remove(&node);
    Ok(())
}
