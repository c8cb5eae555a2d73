//! # flowloom: a durable workflow engine
//!
//! Workflows are authored as a tree of typed nodes (sequences, loops, HTTP
//! calls, timed sleeps, side effects, key/value operations, synthetic
//! failures). A *definition* is registered once; an *instance* is the
//! stateful execution of a definition against a per-instance blackboard.
//! Instances execute one leaf step at a time, with every state transition
//! committed to a relational store, so a crash or restart at any point
//! resumes execution exactly where it left off, with at-most-once effect
//! per successfully-completed step.
//!
//! ## Module guide
//!
//! - [`definition`] - the node tree, references, and the wire format
//! - [`blackboard`] - the per-instance document, patches, and path evaluation
//! - [`interpreter`] - pure traversal: `find_next` / `is_complete`
//! - [`executors`] - one handler per leaf node type
//! - [`step`] - the `StepResult` outcome protocol
//! - [`persistence`] - the adapter trait plus Postgres and in-memory backends
//! - [`runtime`] - the durable worker loop and its configuration
//! - [`telemetry`] - tracing setup
//! - [`error`] - the crate-wide error type
//!
//! ## Quick start
//!
//! ```no_run
//! use flowloom::executors::email::NullMailer;
//! use flowloom::executors::http::ReqwestHttpClient;
//! use flowloom::persistence::InMemoryAdapter;
//! use flowloom::runtime::{RunnerConfig, Worker};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let adapter = Arc::new(InMemoryAdapter::new());
//! let worker = Worker::new(
//!     adapter,
//!     Arc::new(ReqwestHttpClient::new()),
//!     Arc::new(NullMailer),
//!     RunnerConfig::from_env(),
//! );
//! worker.run().await;
//! # }
//! ```

pub mod blackboard;
pub mod definition;
pub mod error;
pub mod executors;
pub mod interpreter;
pub mod persistence;
pub mod runtime;
pub mod step;
pub mod telemetry;
pub mod types;
