//! State machine for one question's pipeline run
//!
//! Nodes are the pipeline stages plus the `Start` and `End` terminals. The
//! transition table in [`transitions`] is plain data; every edge is
//! unconditional, and `ExecuteSql` fans out to two independent successors.
//!
//! ```text
//! Start → ParseQuestion → GetUniqueNouns → GenerateSql → ValidateAndFixSql
//!       → ExecuteSql → { FormatResults, ChooseVisualization }
//! ChooseVisualization → FormatDataForVisualization → End
//! FormatResults → End
//! ```

pub mod transitions;

pub use transitions::{validate_graph, Transition, TRANSITIONS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One node of the pipeline graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    Start,
    ParseQuestion,
    GetUniqueNouns,
    GenerateSql,
    ValidateAndFixSql,
    ExecuteSql,
    FormatResults,
    ChooseVisualization,
    FormatDataForVisualization,
    End,
}

impl Node {
    pub const ALL: [Node; 10] = [
        Node::Start,
        Node::ParseQuestion,
        Node::GetUniqueNouns,
        Node::GenerateSql,
        Node::ValidateAndFixSql,
        Node::ExecuteSql,
        Node::FormatResults,
        Node::ChooseVisualization,
        Node::FormatDataForVisualization,
        Node::End,
    ];

    /// Display name used in events and logs
    pub fn name(&self) -> &'static str {
        match self {
            Node::Start => "Start",
            Node::ParseQuestion => "Parse Question",
            Node::GetUniqueNouns => "Get Unique Nouns",
            Node::GenerateSql => "Generate SQL",
            Node::ValidateAndFixSql => "Validate and Fix SQL",
            Node::ExecuteSql => "Execute SQL",
            Node::FormatResults => "Format Results",
            Node::ChooseVisualization => "Choose Visualization",
            Node::FormatDataForVisualization => "Format Data for Visualization",
            Node::End => "End",
        }
    }

    /// Terminals carry no stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Start | Node::End)
    }

    /// Nodes reached directly from this one
    pub fn successors(&self) -> Vec<Node> {
        TRANSITIONS
            .iter()
            .filter(|t| t.from == *self)
            .map(|t| t.to)
            .collect()
    }

    /// Nodes with an edge into this one
    pub fn predecessors(&self) -> Vec<Node> {
        TRANSITIONS
            .iter()
            .filter(|t| t.to == *self)
            .map(|t| t.from)
            .collect()
    }

    /// Stage nodes in a topological order of the graph
    pub fn stages() -> impl Iterator<Item = Node> {
        Node::ALL.into_iter().filter(|n| !n.is_terminal())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
