//! The workflow definition model: the node tree, reference values, and the
//! normative on-wire JSON shape.
//!
//! A definition is a tree of [`DefinitionNode`]s. Composite nodes
//! (`Sequence`, `ForEach`) carry `children`; leaf nodes carry type-specific
//! [`NodeProps`]. Any property value may be a [`Reference`] — a tagged path
//! into the blackboard, resolved immediately before the owning executor
//! runs and never persisted in resolved form.
//!
//! The wire format is normative (`spec.md` §6): `{ type, id, props,
//! children? }`, with references serialized as `{ "__ref": true, "path":
//! "$.a.b.c" }`. [`DefinitionNode`]'s `Serialize`/`Deserialize` impls are
//! hand-written against an intermediate [`WireNode`] so the `type` tag and
//! the `props` object stay siblings rather than collapsing into one
//! serde-internally-tagged enum, matching that shape exactly.

use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::DefinitionError;

/// A tagged reference into the blackboard, e.g. `$.response.body.title`.
///
/// Never holds a resolved value; resolution happens against a
/// [`crate::blackboard::Blackboard`] immediately before the owning
/// executor runs (see [`crate::blackboard::resolve_refs`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub path: String,
}

impl Reference {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Wrap this reference as the `{"__ref": true, "path": ...}` wire value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "__ref": true, "path": self.path })
    }
}

/// Recognize the `{"__ref": true, "path": "..."}` wire marker inside an
/// arbitrary JSON value. Returns the path when `value` is exactly that
/// shape.
pub fn as_reference(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.len() != 2 {
        return None;
    }
    if obj.get("__ref")?.as_bool()? != true {
        return None;
    }
    obj.get("path")?.as_str()
}

/// One node-type tag in the definition tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Sequence,
    ForEach,
    HitEndpoint,
    Sleep,
    SendEmail,
    KVGet,
    KVSet,
    FailFor,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Sequence => "Sequence",
            NodeType::ForEach => "ForEach",
            NodeType::HitEndpoint => "HitEndpoint",
            NodeType::Sleep => "Sleep",
            NodeType::SendEmail => "SendEmail",
            NodeType::KVGet => "KVGet",
            NodeType::KVSet => "KVSet",
            NodeType::FailFor => "FailFor",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Sequence" => NodeType::Sequence,
            "ForEach" => NodeType::ForEach,
            "HitEndpoint" => NodeType::HitEndpoint,
            "Sleep" => NodeType::Sleep,
            "SendEmail" => NodeType::SendEmail,
            "KVGet" => NodeType::KVGet,
            "KVSet" => NodeType::KVSet,
            "FailFor" => NodeType::FailFor,
            _ => return None,
        })
    }

    fn is_composite(self) -> bool {
        matches!(self, NodeType::Sequence | NodeType::ForEach)
    }
}

/// `ForEach { items, itemVar, indexVar? }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachProps {
    /// Resolved to an array at the moment of descent; may itself be a
    /// [`Reference`].
    pub items: Value,
    #[serde(rename = "itemVar")]
    pub item_var: String,
    #[serde(rename = "indexVar", default, skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,
}

fn default_method() -> Value {
    Value::String("GET".to_string())
}

/// `HitEndpoint { url, method?, headers?, body?, assignTo }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitEndpointProps {
    pub url: Value,
    #[serde(default = "default_method")]
    pub method: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(rename = "assignTo")]
    pub assign_to: String,
}

/// `Sleep { seconds }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepProps {
    pub seconds: Value,
}

/// `SendEmail { to, subject, body }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailProps {
    pub to: Value,
    pub subject: Value,
    pub body: Value,
}

/// `KVGet { store, key, assignTo }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KVGetProps {
    pub store: Value,
    pub key: Value,
    #[serde(rename = "assignTo")]
    pub assign_to: String,
}

/// `KVSet { store, key, value }` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KVSetProps {
    pub store: Value,
    pub key: Value,
    pub value: Value,
}

/// `FailFor { times }` properties. `times` drives retry behavior directly
/// off the scheduler's attempt counter, so unlike the other leaf fields it
/// is never a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailForProps {
    pub times: u32,
}

/// Type-specific node properties. `Sequence` carries none of its own (its
/// behavior is entirely defined by traversal order over `children`).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeProps {
    Sequence,
    ForEach(ForEachProps),
    HitEndpoint(HitEndpointProps),
    Sleep(SleepProps),
    SendEmail(SendEmailProps),
    KVGet(KVGetProps),
    KVSet(KVSetProps),
    FailFor(FailForProps),
}

impl NodeProps {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeProps::Sequence => NodeType::Sequence,
            NodeProps::ForEach(_) => NodeType::ForEach,
            NodeProps::HitEndpoint(_) => NodeType::HitEndpoint,
            NodeProps::Sleep(_) => NodeType::Sleep,
            NodeProps::SendEmail(_) => NodeType::SendEmail,
            NodeProps::KVGet(_) => NodeType::KVGet,
            NodeProps::KVSet(_) => NodeType::KVSet,
            NodeProps::FailFor(_) => NodeType::FailFor,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            NodeProps::Sequence => Ok(Value::Object(Default::default())),
            NodeProps::ForEach(p) => serde_json::to_value(p),
            NodeProps::HitEndpoint(p) => serde_json::to_value(p),
            NodeProps::Sleep(p) => serde_json::to_value(p),
            NodeProps::SendEmail(p) => serde_json::to_value(p),
            NodeProps::KVGet(p) => serde_json::to_value(p),
            NodeProps::KVSet(p) => serde_json::to_value(p),
            NodeProps::FailFor(p) => serde_json::to_value(p),
        }
    }

    fn from_wire(node_type: NodeType, props: Value) -> Result<Self, serde_json::Error> {
        Ok(match node_type {
            NodeType::Sequence => NodeProps::Sequence,
            NodeType::ForEach => NodeProps::ForEach(serde_json::from_value(props)?),
            NodeType::HitEndpoint => NodeProps::HitEndpoint(serde_json::from_value(props)?),
            NodeType::Sleep => NodeProps::Sleep(serde_json::from_value(props)?),
            NodeType::SendEmail => NodeProps::SendEmail(serde_json::from_value(props)?),
            NodeType::KVGet => NodeProps::KVGet(serde_json::from_value(props)?),
            NodeType::KVSet => NodeProps::KVSet(serde_json::from_value(props)?),
            NodeType::FailFor => NodeProps::FailFor(serde_json::from_value(props)?),
        })
    }
}

/// One node in a definition tree.
///
/// `children` is present iff `props` is `Sequence` or `ForEach`;
/// [`DefinitionNode::validate`] enforces this along with id uniqueness.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionNode {
    pub id: String,
    pub props: NodeProps,
    pub children: Option<Vec<DefinitionNode>>,
}

impl DefinitionNode {
    pub fn leaf(id: impl Into<String>, props: NodeProps) -> Self {
        Self {
            id: id.into(),
            props,
            children: None,
        }
    }

    pub fn sequence(id: impl Into<String>, children: Vec<DefinitionNode>) -> Self {
        Self {
            id: id.into(),
            props: NodeProps::Sequence,
            children: Some(children),
        }
    }

    pub fn for_each(id: impl Into<String>, props: ForEachProps, children: Vec<DefinitionNode>) -> Self {
        Self {
            id: id.into(),
            props: NodeProps::ForEach(props),
            children: Some(children),
        }
    }

    /// Validate the shape invariants from `spec.md` §3: non-empty, unique
    /// ids across the whole tree, and `children` present iff the node is
    /// `Sequence`/`ForEach`.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = std::collections::HashSet::new();
        self.validate_into(&mut seen)
    }

    fn validate_into(&self, seen: &mut std::collections::HashSet<String>) -> Result<(), DefinitionError> {
        if self.id.is_empty() {
            return Err(DefinitionError::EmptyId(self.id.clone()));
        }
        if !seen.insert(self.id.clone()) {
            return Err(DefinitionError::DuplicateId(self.id.clone()));
        }
        let node_type = self.props.node_type();
        match (&self.children, node_type.is_composite()) {
            (Some(children), true) => {
                for child in children {
                    child.validate_into(seen)?;
                }
            }
            (None, true) => {
                return Err(DefinitionError::MissingChildren {
                    id: self.id.clone(),
                    node_type: node_type.as_str(),
                });
            }
            (Some(_), false) => {
                return Err(DefinitionError::UnexpectedChildren {
                    id: self.id.clone(),
                    node_type: node_type.as_str(),
                });
            }
            (None, false) => {}
        }
        Ok(())
    }
}

/// Intermediate wire shape mirroring `{ type, id, props, children? }`
/// exactly, used only to drive hand-written (de)serialization of
/// [`DefinitionNode`].
#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<WireNode>>,
}

impl TryFrom<WireNode> for DefinitionNode {
    type Error = serde_json::Error;

    fn try_from(wire: WireNode) -> Result<Self, Self::Error> {
        let node_type = NodeType::parse(&wire.node_type).ok_or_else(|| {
            serde_json::Error::custom(format!("unknown node type `{}`", wire.node_type))
        })?;
        let props = NodeProps::from_wire(node_type, wire.props)?;
        let children = wire
            .children
            .map(|cs| cs.into_iter().map(DefinitionNode::try_from).collect())
            .transpose()?;
        Ok(DefinitionNode {
            id: wire.id,
            props,
            children,
        })
    }
}

impl TryFrom<&DefinitionNode> for WireNode {
    type Error = serde_json::Error;

    fn try_from(node: &DefinitionNode) -> Result<Self, Self::Error> {
        Ok(WireNode {
            id: node.id.clone(),
            node_type: node.props.node_type().as_str().to_string(),
            props: node.props.to_value()?,
            children: node
                .children
                .as_ref()
                .map(|cs| cs.iter().map(WireNode::try_from).collect())
                .transpose()?,
        })
    }
}

impl Serialize for DefinitionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = WireNode::try_from(self).map_err(S::Error::custom)?;
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DefinitionNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireNode::deserialize(deserializer)?;
        DefinitionNode::try_from(wire).map_err(D::Error::custom)
    }
}
