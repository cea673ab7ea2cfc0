// Loop state for one repair attempt

use serde::{Deserialize, Serialize};

use crate::patch::PatchResult;
use crate::testrun::TestResult;

/// Terminal disposition of an attempt. `Pending` only exists while the
/// loop is running; once any other value is set, no further component
/// calls occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Pending,
    /// The policy actor signalled accept.
    Succeeded,
    /// The iteration budget ran out without an accept. A valid outcome,
    /// not an error.
    Exhausted,
    /// An unrecoverable tool error or a cancellation cut the attempt
    /// short.
    Aborted,
}

impl Termination {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The controller's single mutable view of the loop. Returned whole at the
/// end of every attempt so callers can audit the last patch and test even
/// when they disagree with the verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    /// Patch/test/critique cycles consumed so far.
    pub iteration: u32,
    pub last_patch: Option<PatchResult>,
    pub last_test: Option<TestResult>,
    pub termination: Termination,
    /// Human-readable cause, set when `termination` is `Aborted`.
    pub abort_reason: Option<String>,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            last_patch: None,
            last_test: None,
            termination: Termination::Pending,
            abort_reason: None,
        }
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

/// What the binary reports when an attempt finishes: enough for a caller
/// to classify it as repaired, exhausted, or aborted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    pub instance_id: String,
    pub termination: Termination,
    pub iterations: u32,
    pub last_test: Option<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl AttemptReport {
    pub fn new(instance_id: &str, state: &LoopState) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            termination: state.termination,
            iterations: state.iteration,
            last_test: state.last_test.clone(),
            abort_reason: state.abort_reason.clone(),
        }
    }
}
