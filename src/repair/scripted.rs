// Scripted policy actor - deterministic plan playback
//
// The simplest decision procedure that satisfies the policy contract:
// replay a fixed list of edits, one per iteration, and accept as soon as
// the suite is green. Used by the binary for reproducible runs and handy
// as a reference implementation of the trait.

use async_trait::async_trait;
use serde::Deserialize;

use crate::instance::BugInstance;
use crate::repair::policy::{LocateRequest, PatchCommand, PolicyActor, PolicyContext, Verdict};

/// A replayable repair plan, read from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct RepairPlan {
    /// Pattern for the locate step.
    pub pattern: String,
    /// Search roots relative to the workspace root; empty means the whole
    /// checkout.
    #[serde(default)]
    pub roots: Vec<String>,
    /// One edit per iteration. When the loop outlives the list, the last
    /// edit is replayed.
    pub steps: Vec<PlannedEdit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlannedEdit {
    LineEdit {
        file: String,
        line: usize,
        new_text: String,
    },
    Diff {
        diff: String,
    },
}

impl RepairPlan {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let plan: Self = serde_json::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse repair plan JSON: {e}"))?;
        if plan.steps.is_empty() {
            anyhow::bail!("Repair plan has no steps");
        }
        Ok(plan)
    }
}

pub struct ScriptedActor {
    plan: RepairPlan,
}

impl ScriptedActor {
    /// The plan must hold at least one step. `RepairPlan::from_json`
    /// enforces that at parse time; hand-built plans are checked here.
    pub fn new(plan: RepairPlan) -> Self {
        assert!(!plan.steps.is_empty(), "repair plan has no steps");
        Self { plan }
    }
}

#[async_trait]
impl PolicyActor for ScriptedActor {
    async fn locate(&self, _instance: &BugInstance) -> LocateRequest {
        LocateRequest {
            pattern: self.plan.pattern.clone(),
            roots: self.plan.roots.clone(),
        }
    }

    async fn plan_patch(&self, ctx: PolicyContext<'_>) -> PatchCommand {
        let idx = (ctx.iteration as usize).min(self.plan.steps.len().saturating_sub(1));
        match self.plan.steps[idx].clone() {
            PlannedEdit::LineEdit {
                file,
                line,
                new_text,
            } => PatchCommand::LineEdit {
                file,
                line,
                new_text,
            },
            PlannedEdit::Diff { diff } => PatchCommand::Diff { diff },
        }
    }

    async fn critique(&self, ctx: PolicyContext<'_>) -> Verdict {
        match ctx.last_test {
            Some(test) if test.exit_code == 0 && test.failed == 0 => Verdict::Accept,
            _ => Verdict::Retry {
                pattern: None,
                roots: None,
            },
        }
    }
}
