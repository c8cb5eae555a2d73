//! Crate-wide error types.
//!
//! Each module that can fail defines its own `thiserror`-derived error
//! enum with a `miette::Diagnostic` impl carrying an error code and a
//! `help()` string; [`EngineError`] aggregates them with `#[from]`
//! conversions so callers at the worker-loop boundary can match on one
//! type while still getting the specific variant when they need it.

use miette::Diagnostic;
use thiserror::Error;

use crate::executors::ExecutorError;
use crate::persistence::PersistenceError;

/// Errors raised while validating or interpreting a definition tree.
#[derive(Debug, Error, Diagnostic)]
pub enum DefinitionError {
    #[error("node id `{0}` is empty")]
    #[diagnostic(code(flowloom::definition::empty_id))]
    EmptyId(String),

    #[error("duplicate node id `{0}` in definition tree")]
    #[diagnostic(
        code(flowloom::definition::duplicate_id),
        help("Every node id must be unique across the whole tree.")
    )]
    DuplicateId(String),

    #[error("node `{id}` of type {node_type} must not carry `children`")]
    #[diagnostic(
        code(flowloom::definition::unexpected_children),
        help("Only Sequence and ForEach nodes may have children.")
    )]
    UnexpectedChildren { id: String, node_type: &'static str },

    #[error("node `{id}` of type {node_type} requires `children`")]
    #[diagnostic(code(flowloom::definition::missing_children))]
    MissingChildren { id: String, node_type: &'static str },
}

/// Errors raised while traversing a definition tree against a step map.
#[derive(Debug, Error, Diagnostic)]
pub enum InterpreterError {
    #[error("missing definition for instance `{instance_id}`")]
    #[diagnostic(
        code(flowloom::interpreter::missing_definition),
        help("The instance references a definition id that no longer exists; this indicates structural corruption.")
    )]
    MissingDefinition { instance_id: String },
}

/// Top-level error type aggregating every module's error enum.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Interpreter(#[from] InterpreterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
