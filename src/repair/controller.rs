// The bounded repair loop
//
// Locating -> Iterating(k) -> {Succeeded | Exhausted | Aborted}
//
// The controller owns the only mutable loop state and issues at most one
// component call at a time. Component errors never escape it: each one is
// translated into either a failed iteration (reset, continue) or an
// attempt-level abort, and the caller always receives a completed
// LoopState.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::RepairError;
use crate::instance::BugInstance;
use crate::patch::{PatchApplier, PatchResult};
use crate::repair::policy::{PatchCommand, PolicyActor, PolicyContext, Verdict};
use crate::repair::state::{LoopState, Termination};
use crate::search::{SearchEngine, SearchHit};
use crate::testrun::TestExecutor;
use crate::workspace::{Workspace, WorkspaceManager};

pub struct RepairController<'a> {
    manager: &'a WorkspaceManager,
    search: &'a SearchEngine,
    patcher: &'a PatchApplier,
    tests: &'a TestExecutor,
    max_iterations: u32,
    cancel: CancellationToken,
}

impl<'a> RepairController<'a> {
    pub fn new(
        manager: &'a WorkspaceManager,
        search: &'a SearchEngine,
        patcher: &'a PatchApplier,
        tests: &'a TestExecutor,
        max_iterations: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            search,
            patcher,
            tests,
            max_iterations,
            cancel,
        }
    }

    /// Run one full attempt. Never returns early with an error: every
    /// outcome, including aborts, is a completed `LoopState`.
    #[instrument(skip_all, fields(instance = %instance.instance_id))]
    pub async fn run(
        &self,
        instance: &BugInstance,
        workspace: &Workspace,
        actor: &dyn PolicyActor,
        test_selectors: &[String],
    ) -> LoopState {
        let mut state = LoopState::new();

        // Locating (once). An empty hit list is degraded input, not a
        // failure: the actor may still pick a location on its own.
        let request = actor.locate(instance).await;
        let roots = resolve_roots(workspace, &request.roots);
        let mut hits: Vec<SearchHit> = match self.search.search(&request.pattern, &roots).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("locate search failed, continuing with no hits: {e}");
                Vec::new()
            }
        };
        info!(pattern = %request.pattern, hits = hits.len(), "located candidate sites");

        for k in 0..self.max_iterations {
            if self.cancel.is_cancelled() {
                return abort(state, "cancelled".to_string());
            }

            // Patch step.
            let command = actor
                .plan_patch(PolicyContext {
                    instance,
                    hits: &hits,
                    last_patch: state.last_patch.as_ref(),
                    last_test: state.last_test.as_ref(),
                    iteration: k,
                })
                .await;

            let patch_failed = match self.apply(workspace, command).await {
                Ok(result) => {
                    let failed = !result.applied;
                    if failed {
                        info!(iteration = k, "patch rejected: {}", result.message);
                    }
                    state.last_patch = Some(result);
                    failed
                }
                Err(e) if e.is_fatal() => {
                    // A failed compensation leaves an unknown tree; try a
                    // full reset so the cache entry is not poisoned, then
                    // give up on this attempt.
                    if matches!(e, RepairError::CompensationFailed(_)) {
                        if let Err(reset_err) = self.manager.reset(workspace, None).await {
                            warn!("post-compensation reset failed: {reset_err}");
                        }
                    }
                    return abort(state, e.to_string());
                }
                Err(e) => {
                    info!(iteration = k, "patch step failed: {e}");
                    state.last_patch = Some(failed_patch(&e));
                    true
                }
            };

            if patch_failed {
                state.iteration = k + 1;
                if let Err(e) = self.manager.reset(workspace, None).await {
                    return abort(state, e.to_string());
                }
                continue;
            }

            // Test step.
            match self.tests.run(workspace, test_selectors).await {
                Ok(result) => {
                    info!(
                        iteration = k,
                        exit_code = result.exit_code,
                        passed = result.passed,
                        failed = result.failed,
                        "test run complete"
                    );
                    state.last_test = Some(result);
                }
                Err(e) if e.is_fatal() => return abort(state, e.to_string()),
                Err(e) => {
                    // Retryable (typically a timeout): burn the iteration.
                    warn!(iteration = k, "test step failed: {e}");
                    state.iteration = k + 1;
                    if let Err(e) = self.manager.reset(workspace, None).await {
                        return abort(state, e.to_string());
                    }
                    continue;
                }
            }

            // Critique step.
            let verdict = actor
                .critique(PolicyContext {
                    instance,
                    hits: &hits,
                    last_patch: state.last_patch.as_ref(),
                    last_test: state.last_test.as_ref(),
                    iteration: k,
                })
                .await;
            state.iteration = k + 1;

            match verdict {
                Verdict::Accept => {
                    // Honored even when the last test run still shows
                    // failures; the raw result stays in state for audit.
                    info!(iteration = k, "actor accepted the patch");
                    state.termination = Termination::Succeeded;
                    return state;
                }
                Verdict::Retry { pattern, roots } => {
                    info!(iteration = k, "actor requested a retry");
                    if let Err(e) = self.manager.reset(workspace, None).await {
                        return abort(state, e.to_string());
                    }
                    if let Some(pattern) = pattern {
                        let roots = resolve_roots(workspace, &roots.unwrap_or_default());
                        match self.search.search(&pattern, &roots).await {
                            Ok(revised) => hits = revised,
                            Err(e) => warn!("revised search failed, keeping prior hits: {e}"),
                        }
                    }
                }
            }
        }

        info!(iterations = state.iteration, "iteration budget exhausted");
        state.termination = Termination::Exhausted;
        state
    }

    async fn apply(
        &self,
        workspace: &Workspace,
        command: PatchCommand,
    ) -> crate::error::Result<PatchResult> {
        match command {
            PatchCommand::LineEdit {
                file,
                line,
                new_text,
            } => {
                self.patcher
                    .apply_line_edit(&workspace.root, &file, line, &new_text)
                    .await
            }
            PatchCommand::Diff { diff } => self.patcher.apply_diff(&workspace.root, &diff).await,
        }
    }
}

/// Roots from the actor are relative to the workspace; empty means the
/// whole checkout.
fn resolve_roots(workspace: &Workspace, roots: &[String]) -> Vec<PathBuf> {
    if roots.is_empty() {
        vec![workspace.root.clone()]
    } else {
        roots.iter().map(|r| workspace.root.join(r)).collect()
    }
}

fn abort(mut state: LoopState, reason: String) -> LoopState {
    warn!("attempt aborted: {reason}");
    state.termination = Termination::Aborted;
    state.abort_reason = Some(reason);
    state
}

/// Audit record for a patch step that errored before producing a result.
fn failed_patch(error: &RepairError) -> PatchResult {
    PatchResult {
        file: String::new(),
        line: 0,
        diff: String::new(),
        applied: false,
        message: error.to_string(),
    }
}
