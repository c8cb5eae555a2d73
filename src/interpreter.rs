//! Pure traversal over a definition tree and a step map: `find_next` and
//! `is_complete`.
//!
//! Neither function touches persistence or resolves references inside leaf
//! props — that happens in the executor, against the scoped blackboard this
//! module hands back. The only resolution done here is the `ForEach.items`
//! reference, because the traversal itself needs a concrete array to know
//! how many iterations exist.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::blackboard::{self, Blackboard};
use crate::definition::{DefinitionNode, ForEachProps, NodeProps};
use crate::types::{EffectiveId, StepStatus};

/// In-memory view of the persisted step statuses for one instance, keyed
/// by effective node id. Loaded once per worker pass and consulted
/// read-only by the interpreter.
pub type StepMap = FxHashMap<String, StepStatus>;

/// The next leaf to execute, together with its effective id and the
/// blackboard scoped for whatever loop iterations it sits inside.
pub struct Found<'a> {
    pub node: &'a DefinitionNode,
    pub effective_id: EffectiveId,
    pub scoped_blackboard: Blackboard,
}

/// Bind `__item`/`__index` (and any author-chosen `itemVar`/`indexVar`)
/// into a derived blackboard for one loop iteration. These keys are
/// transient: patches returned by the executor apply to the *un-scoped*
/// parent blackboard, so this derived copy is never persisted.
fn scoped_blackboard(bb: &Value, fe: &ForEachProps, item: &Value, index: usize) -> Value {
    let mut scoped = bb.clone();
    if !scoped.is_object() {
        scoped = blackboard::empty();
    }
    let map = scoped.as_object_mut().expect("just ensured object");
    map.insert("__item".to_string(), item.clone());
    map.insert("__index".to_string(), Value::from(index as u64));
    map.insert(fe.item_var.clone(), item.clone());
    if let Some(index_var) = &fe.index_var {
        map.insert(index_var.clone(), Value::from(index as u64));
    }
    scoped
}

fn find_next_children<'a>(
    children: &'a [DefinitionNode],
    steps: &StepMap,
    bb: &Value,
    prefix: &str,
) -> Option<Found<'a>> {
    for child in children {
        if let Some(found) = find_next(child, steps, bb, prefix) {
            return Some(found);
        }
    }
    None
}

fn is_complete_children(children: &[DefinitionNode], steps: &StepMap, bb: &Value, prefix: &str) -> bool {
    children.iter().all(|c| is_complete(c, steps, bb, prefix))
}

/// Resolve `ForEach.items` to a concrete array, logging (never panicking)
/// and treating the loop as contributing zero iterations when it isn't one.
fn resolve_items<'a>(fe: &ForEachProps, node_id: &str, bb: &Value, scratch: &'a mut Value) -> Option<&'a [Value]> {
    *scratch = blackboard::resolve_refs(&fe.items, bb);
    match scratch.as_array() {
        Some(items) => Some(items),
        None => {
            tracing::warn!(node_id, "ForEach items did not resolve to an array; treating as an empty, already-complete loop");
            None
        }
    }
}

/// Find the next leaf that should execute, or `None` if the subtree
/// rooted at `node` is complete.
///
/// `id_prefix` is the effective-id scope this node sits in: the empty
/// string at the root, or `<loop_effective_id>[<index>]` one level inside
/// each enclosing `ForEach` iteration.
pub fn find_next<'a>(node: &'a DefinitionNode, steps: &StepMap, bb: &Value, id_prefix: &str) -> Option<Found<'a>> {
    match &node.props {
        NodeProps::Sequence => {
            let children = node.children.as_deref().unwrap_or(&[]);
            find_next_children(children, steps, bb, id_prefix)
        }
        NodeProps::ForEach(fe) => {
            let mut scratch = Value::Null;
            let items = resolve_items(fe, &node.id, bb, &mut scratch)?;
            let loop_effective = EffectiveId::join(id_prefix, &node.id);
            let children = node.children.as_deref().unwrap_or(&[]);
            for (i, item) in items.iter().enumerate() {
                let iter_prefix = EffectiveId::enter_iteration(loop_effective.as_str(), i);
                let scoped = scoped_blackboard(bb, fe, item, i);
                if is_complete_children(children, steps, &scoped, &iter_prefix) {
                    continue;
                }
                return find_next_children(children, steps, &scoped, &iter_prefix);
            }
            None
        }
        _leaf => {
            let effective = EffectiveId::join(id_prefix, &node.id);
            match steps.get(effective.as_str()) {
                Some(StepStatus::Succeeded) => None,
                _ => Some(Found {
                    node,
                    effective_id: effective,
                    scoped_blackboard: bb.clone(),
                }),
            }
        }
    }
}

/// Answer whether the subtree rooted at `node` has no work left. A
/// `ForEach` over a zero-length (or non-array) items value is complete by
/// definition — it contributed no steps.
pub fn is_complete(node: &DefinitionNode, steps: &StepMap, bb: &Value, id_prefix: &str) -> bool {
    match &node.props {
        NodeProps::Sequence => {
            let children = node.children.as_deref().unwrap_or(&[]);
            is_complete_children(children, steps, bb, id_prefix)
        }
        NodeProps::ForEach(fe) => {
            let mut scratch = Value::Null;
            let Some(items) = resolve_items(fe, &node.id, bb, &mut scratch) else {
                return true;
            };
            let loop_effective = EffectiveId::join(id_prefix, &node.id);
            let children = node.children.as_deref().unwrap_or(&[]);
            items.iter().enumerate().all(|(i, item)| {
                let iter_prefix = EffectiveId::enter_iteration(loop_effective.as_str(), i);
                let scoped = scoped_blackboard(bb, fe, item, i);
                is_complete_children(children, steps, &scoped, &iter_prefix)
            })
        }
        _leaf => {
            let effective = EffectiveId::join(id_prefix, &node.id);
            matches!(steps.get(effective.as_str()), Some(StepStatus::Succeeded))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{HitEndpointProps, SendEmailProps, SleepProps};
    use serde_json::json;

    fn sequence_fixture() -> DefinitionNode {
        DefinitionNode::sequence(
            "root",
            vec![
                DefinitionNode::leaf(
                    "h",
                    NodeProps::HitEndpoint(HitEndpointProps {
                        url: json!("https://example.test/json"),
                        method: json!("GET"),
                        headers: None,
                        body: None,
                        assign_to: "$.r".to_string(),
                    }),
                ),
                DefinitionNode::leaf("s", NodeProps::Sleep(SleepProps { seconds: json!(1) })),
                DefinitionNode::leaf(
                    "e",
                    NodeProps::SendEmail(SendEmailProps {
                        to: json!("u@x"),
                        subject: json!("t"),
                        body: json!("b"),
                    }),
                ),
            ],
        )
    }

    #[test]
    fn sequence_visits_children_in_order() {
        let tree = sequence_fixture();
        let bb = blackboard::empty();
        let steps = StepMap::default();

        let found = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "h");

        let mut steps = StepMap::default();
        steps.insert("h".to_string(), StepStatus::Succeeded);
        let found = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "s");

        steps.insert("s".to_string(), StepStatus::Succeeded);
        let found = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "e");

        steps.insert("e".to_string(), StepStatus::Succeeded);
        assert!(find_next(&tree, &steps, &bb, "").is_none());
        assert!(is_complete(&tree, &steps, &bb, ""));
    }

    #[test]
    fn for_each_produces_per_iteration_effective_ids() {
        let tree = DefinitionNode::for_each(
            "loop",
            ForEachProps {
                items: json!({"__ref": true, "path": "$.slides"}),
                item_var: "slide".to_string(),
                index_var: None,
            },
            vec![DefinitionNode::leaf(
                "mail",
                NodeProps::SendEmail(SendEmailProps {
                    to: json!("u@x"),
                    subject: json!({"__ref": true, "path": "$.__item.title"}),
                    body: json!({"__ref": true, "path": "$.__item.type"}),
                }),
            )],
        );
        let bb = json!({"slides": [{"title": "a"}, {"title": "b"}, {"title": "c"}]});
        let mut steps = StepMap::default();

        let found = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "loop[0].mail");
        assert_eq!(
            found.scoped_blackboard.get("__item"),
            Some(&json!({"title": "a"}))
        );
        assert_eq!(found.scoped_blackboard.get("slide"), Some(&json!({"title": "a"})));

        steps.insert("loop[0].mail".to_string(), StepStatus::Succeeded);
        let found = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "loop[1].mail");

        steps.insert("loop[1].mail".to_string(), StepStatus::Succeeded);
        steps.insert("loop[2].mail".to_string(), StepStatus::Succeeded);
        assert!(find_next(&tree, &steps, &bb, "").is_none());
        assert!(is_complete(&tree, &steps, &bb, ""));
    }

    #[test]
    fn zero_length_for_each_is_immediately_complete() {
        let tree = DefinitionNode::for_each(
            "loop",
            ForEachProps {
                items: json!([]),
                item_var: "x".to_string(),
                index_var: None,
            },
            vec![DefinitionNode::leaf(
                "mail",
                NodeProps::SendEmail(SendEmailProps {
                    to: json!("u@x"),
                    subject: json!("t"),
                    body: json!("b"),
                }),
            )],
        );
        let bb = blackboard::empty();
        let steps = StepMap::default();
        assert!(is_complete(&tree, &steps, &bb, ""));
        assert!(find_next(&tree, &steps, &bb, "").is_none());
    }

    #[test]
    fn non_array_for_each_items_is_treated_as_complete_not_a_crash() {
        let tree = DefinitionNode::for_each(
            "loop",
            ForEachProps {
                items: json!({"__ref": true, "path": "$.not_here"}),
                item_var: "x".to_string(),
                index_var: None,
            },
            vec![DefinitionNode::leaf(
                "mail",
                NodeProps::SendEmail(SendEmailProps {
                    to: json!("u@x"),
                    subject: json!("t"),
                    body: json!("b"),
                }),
            )],
        );
        let bb = blackboard::empty();
        let steps = StepMap::default();
        assert!(is_complete(&tree, &steps, &bb, ""));
        assert!(find_next(&tree, &steps, &bb, "").is_none());
    }

    #[test]
    fn find_next_is_idempotent_without_intervening_mutation() {
        let tree = sequence_fixture();
        let bb = blackboard::empty();
        let steps = StepMap::default();
        let a = find_next(&tree, &steps, &bb, "").unwrap();
        let b = find_next(&tree, &steps, &bb, "").unwrap();
        assert_eq!(a.effective_id.as_str(), b.effective_id.as_str());
    }

    #[test]
    fn nested_loop_effective_ids_nest_the_index_suffix() {
        let inner = DefinitionNode::for_each(
            "inner",
            ForEachProps {
                items: json!({"__ref": true, "path": "$.__item.rows"}),
                item_var: "row".to_string(),
                index_var: None,
            },
            vec![DefinitionNode::leaf(
                "leaf",
                NodeProps::SendEmail(SendEmailProps {
                    to: json!("u@x"),
                    subject: json!("t"),
                    body: json!("b"),
                }),
            )],
        );
        let outer = DefinitionNode::for_each(
            "outer",
            ForEachProps {
                items: json!({"__ref": true, "path": "$.groups"}),
                item_var: "group".to_string(),
                index_var: None,
            },
            vec![inner],
        );
        let bb = json!({"groups": [{"rows": ["x", "y"]}]});
        let steps = StepMap::default();
        let found = find_next(&outer, &steps, &bb, "").unwrap();
        assert_eq!(found.effective_id.as_str(), "outer[0].inner[0].leaf");
    }
}
