//! Core identifier types shared across the engine.
//!
//! These are the fundamental domain concepts that every other module
//! builds on: the status enums for instances and steps, and the
//! "effective node id" tokenizer that gives per-loop-iteration durability
//! without ever rewriting the definition tree (see [`EffectiveId`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Runnable,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Runnable => "runnable",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "runnable" => Some(InstanceStatus::Runnable),
            "completed" => Some(InstanceStatus::Completed),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "succeeded" => Some(StepStatus::Succeeded),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted identifier for one leaf node's execution within one
/// instance, including any loop-iteration suffixes.
///
/// For a leaf directly under the root, this is just the node's own `id`.
/// For a leaf nested inside a `ForEach` with id `loop` visiting index `i`,
/// it is `loop[i].<node id>`, nested again for loops within loops, e.g.
/// `outer[0].inner[2].leaf`.
///
/// This is what gives per-iteration durability without cloning or
/// rewriting the definition tree: the same raw child node maps to N
/// distinct step rows, one per visited element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectiveId(String);

impl EffectiveId {
    /// Build an effective id from a node id with no enclosing loop scope.
    pub fn root(node_id: &str) -> Self {
        Self(node_id.to_string())
    }

    /// Extend a prefix (itself an effective id, possibly empty) with a
    /// loop iteration index, yielding `<prefix>[<index>]`.
    pub fn enter_iteration(prefix: &str, index: usize) -> String {
        format!("{prefix}[{index}]")
    }

    /// Join an iteration prefix with a child node id: `<prefix>.<node_id>`.
    pub fn join(prefix: &str, node_id: &str) -> Self {
        if prefix.is_empty() {
            Self(node_id.to_string())
        } else {
            Self(format!("{prefix}.{node_id}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EffectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EffectiveId> for String {
    fn from(id: EffectiveId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_bare_node_id() {
        assert_eq!(EffectiveId::root("fetch").as_str(), "fetch");
    }

    #[test]
    fn single_loop_nesting() {
        let prefix = EffectiveId::enter_iteration("loop", 2);
        assert_eq!(prefix, "loop[2]");
        let effective = EffectiveId::join(&prefix, "mail");
        assert_eq!(effective.as_str(), "loop[2].mail");
    }

    #[test]
    fn nested_loop_nesting() {
        let outer = EffectiveId::enter_iteration("outer", 0);
        let outer_inner = EffectiveId::join(&outer, "inner");
        let inner_iter = EffectiveId::enter_iteration(outer_inner.as_str(), 3);
        let leaf = EffectiveId::join(&inner_iter, "leaf");
        assert_eq!(leaf.as_str(), "outer[0].inner[3].leaf");
    }

    #[test]
    fn status_round_trips() {
        for s in [
            InstanceStatus::Runnable,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
        ] {
            assert_eq!(InstanceStatus::parse(s.as_str()), Some(s));
        }
        for s in [StepStatus::Pending, StepStatus::Succeeded, StepStatus::Failed] {
            assert_eq!(StepStatus::parse(s.as_str()), Some(s));
        }
    }
}
