//! One executor per leaf node type.
//!
//! Executors are pure-ish adapters: `(resolved props, scoped blackboard,
//! attempt, injected collaborators) -> StepResult`. Reference resolution
//! against the scoped blackboard happens here, immediately before the
//! collaborator call — never inside [`crate::interpreter`].
//!
//! [`dispatch`] is the single entry point the worker loop calls; it picks
//! the right executor off the node's type tag, mirroring how
//! `weavegraph`'s `Node` trait is invoked uniformly from its runner
//! regardless of concrete node type.

pub mod email;
pub mod fail_for;
pub mod http;
pub mod kv;
pub mod sleep;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::blackboard::Blackboard;
use crate::definition::{DefinitionNode, NodeProps};
use crate::step::{ExecutorContext, StepResult};

/// Errors raised while executing a single leaf node.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error("http request failed: {0}")]
    #[diagnostic(code(flowloom::executor::http))]
    Http(String),

    #[error("kv store operation failed: {0}")]
    #[diagnostic(code(flowloom::executor::kv))]
    Kv(String),

    #[error("node `{id}` is a composite; only leaf nodes have an executor")]
    #[diagnostic(
        code(flowloom::executor::not_a_leaf),
        help("This indicates the interpreter handed a Sequence/ForEach node to dispatch, which is a bug in the caller, not the definition.")
    )]
    NotALeaf { id: String },
}

/// Common shape every leaf executor implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError>;
}

/// Run the executor for `node`'s leaf type against the already-scoped
/// blackboard. Returns [`ExecutorError::NotALeaf`] for `Sequence`/`ForEach`
/// — the worker loop only ever calls this with what `find_next` returned,
/// which is always a leaf, so hitting this variant means a caller bug.
pub async fn dispatch(
    node: &DefinitionNode,
    scoped_bb: &Blackboard,
    ctx: &ExecutorContext<'_>,
) -> Result<StepResult, ExecutorError> {
    match &node.props {
        NodeProps::HitEndpoint(props) => http::HitEndpointExecutor { props }.execute(scoped_bb, ctx).await,
        NodeProps::Sleep(props) => sleep::SleepExecutor { props }.execute(scoped_bb, ctx).await,
        NodeProps::SendEmail(props) => email::SendEmailExecutor { props }.execute(scoped_bb, ctx).await,
        NodeProps::KVGet(props) => kv::KvGetExecutor { props }.execute(scoped_bb, ctx).await,
        NodeProps::KVSet(props) => kv::KvSetExecutor { props }.execute(scoped_bb, ctx).await,
        NodeProps::FailFor(props) => fail_for::FailForExecutor { props: *props }.execute(scoped_bb, ctx).await,
        NodeProps::Sequence | NodeProps::ForEach(_) => Err(ExecutorError::NotALeaf { id: node.id.clone() }),
    }
}

/// Coerce a resolved blackboard value to a string the way the leaf
/// executors need for recipient/subject/key fields: strings pass through,
/// everything else (including `null` for an unresolved reference) is
/// rendered via its JSON text form.
pub(crate) fn value_to_string(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
