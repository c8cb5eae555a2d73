//! The outcome protocol an executor hands back to the worker loop, and the
//! context an executor runs with.

use crate::blackboard::Patch;

/// What an executor returns after (attempting) one leaf node.
///
/// None of the three variants is an exception: executors report failure as
/// data, never by propagating an error out of `execute`. [`StepResult::Fail`]
/// is the only variant the scheduler treats as non-terminal-positive; both
/// `Success` and `Wait` mark the underlying step `succeeded` (see the
/// "wait as success" design note on [`crate::interpreter`]).
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The step succeeded outright. `patches` apply to the un-scoped
    /// instance blackboard, in order.
    Success { patches: Vec<Patch> },

    /// The step succeeded as a scheduling commitment: the instance should
    /// become runnable again at `next_run_at_ms`, and on resumption the
    /// interpreter picks a fresh leaf — this step is not re-executed.
    Wait { next_run_at_ms: i64, patches: Vec<Patch> },

    /// The step failed this attempt. `retry_at_ms`, if set, is a
    /// lower bound the scheduler's backoff computation must respect;
    /// if unset the scheduler applies its own exponential backoff.
    Fail { error: String, retry_at_ms: Option<i64> },
}

impl StepResult {
    pub fn success() -> Self {
        StepResult::Success { patches: Vec::new() }
    }

    pub fn success_with(patches: Vec<Patch>) -> Self {
        StepResult::Success { patches }
    }

    pub fn wait(next_run_at_ms: i64) -> Self {
        StepResult::Wait {
            next_run_at_ms,
            patches: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        StepResult::Fail {
            error: error.into(),
            retry_at_ms: None,
        }
    }
}

/// Everything an executor needs besides the node's own (already
/// reference-resolved) props: the current attempt number for this step and
/// the collaborators injected by the runtime.
///
/// `attempt` is the scheduler's freshly-incremented attempt counter for
/// this effective id (step 5 of the worker loop), handed to the executor
/// so e.g. `FailFor` can answer purely from it without touching
/// persistence itself.
pub struct ExecutorContext<'a> {
    pub attempt: u32,
    pub http: &'a dyn crate::executors::http::HttpClient,
    pub kv: &'a dyn crate::executors::kv::KvStore,
    pub mailer: &'a dyn crate::executors::email::Mailer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_defaults_to_no_patches() {
        assert_eq!(StepResult::success(), StepResult::Success { patches: vec![] });
    }
}
