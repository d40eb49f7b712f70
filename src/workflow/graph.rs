//! Flow Structure
//!
//! Describes how the tasks of a flow nest, independently of any execution.
//! Each composite becomes a node tagged with how its children relate; error
//! branches hang under the composite as a separate `<id>.errors` node.

use serde::{Deserialize, Serialize};

use super::model::{Flow, Task, TaskKind};

/// How the children of a structural node relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Sequential,
    Parallel,
    /// Children repeated for every iteration value
    Dynamic,
    Error,
}

/// One node of the structure tree. Leaf tasks have no relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StructuralNode>,
}

impl StructuralNode {
    fn leaf(id: &str) -> Self {
        Self {
            id: id.to_string(),
            relation: None,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, this one included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(StructuralNode::size).sum::<usize>()
    }
}

/// Builds the structure of a single task and its descendants.
pub fn build_structure(task: &Task) -> StructuralNode {
    let relation = match task.kind {
        TaskKind::Sequential(_) => RelationType::Sequential,
        TaskKind::Parallel(_) => RelationType::Parallel,
        TaskKind::EachSequential(_) | TaskKind::EachParallel(_) => RelationType::Dynamic,
        TaskKind::Bash { .. } | TaskKind::Log { .. } | TaskKind::Fail { .. } => {
            return StructuralNode::leaf(&task.id)
        }
    };

    match task.as_flowable() {
        Some(flowable) => composite(&task.id, relation, flowable.tasks, flowable.errors),
        None => StructuralNode::leaf(&task.id),
    }
}

/// Builds the structure of a whole flow; the root is sequential.
pub fn flow_structure(flow: &Flow) -> StructuralNode {
    composite(&flow.id, RelationType::Sequential, &flow.tasks, &flow.errors)
}

fn composite(id: &str, relation: RelationType, tasks: &[Task], errors: &[Task]) -> StructuralNode {
    let mut children = enabled(tasks);

    let error_children = enabled(errors);
    if !error_children.is_empty() {
        children.push(StructuralNode {
            id: format!("{}.errors", id),
            relation: Some(RelationType::Error),
            children: error_children,
        });
    }

    StructuralNode {
        id: id.to_string(),
        relation: Some(relation),
        children,
    }
}

fn enabled(tasks: &[Task]) -> Vec<StructuralNode> {
    tasks
        .iter()
        .filter(|task| !task.disabled)
        .map(build_structure)
        .collect()
}
