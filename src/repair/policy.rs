// The policy actor seam
//
// Everything that decides WHAT to do - which pattern to search, what edit
// to make, when to declare success - lives behind this trait. The core
// validates the shape of what comes back and never assumes anything about
// how the decisions are produced.

use async_trait::async_trait;

use crate::instance::BugInstance;
use crate::patch::PatchResult;
use crate::search::SearchHit;
use crate::testrun::TestResult;

/// Everything the actor may look at before a decision.
pub struct PolicyContext<'a> {
    pub instance: &'a BugInstance,
    pub hits: &'a [SearchHit],
    pub last_patch: Option<&'a PatchResult>,
    pub last_test: Option<&'a TestResult>,
    /// 0-based index of the current iteration.
    pub iteration: u32,
}

/// Initial search arguments, derived from the bug report by the actor.
/// Roots are relative to the workspace root; empty means "whole tree".
#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub pattern: String,
    pub roots: Vec<String>,
}

/// One patch step's arguments.
#[derive(Debug, Clone)]
pub enum PatchCommand {
    /// Replace a single line of a single file (path relative to the
    /// workspace root).
    LineEdit {
        file: String,
        line: usize,
        new_text: String,
    },
    /// A full unified diff, applied under the strict change-size budget.
    Diff { diff: String },
}

/// Critique-step outcome.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Terminal success. The actor is the authority: this is honored even
    /// when the last test run still reports failures, and the raw results
    /// stay in the final state for audit.
    Accept,
    /// Run another iteration from a clean tree, optionally with revised
    /// search arguments.
    Retry {
        pattern: Option<String>,
        roots: Option<Vec<String>>,
    },
}

#[async_trait]
pub trait PolicyActor: Send + Sync {
    /// Derive the locate-step search from the bug report.
    async fn locate(&self, instance: &BugInstance) -> LocateRequest;

    /// Supply the arguments for this iteration's patch step.
    async fn plan_patch(&self, ctx: PolicyContext<'_>) -> PatchCommand;

    /// Inspect the iteration's results and accept or retry.
    async fn critique(&self, ctx: PolicyContext<'_>) -> Verdict;
}
