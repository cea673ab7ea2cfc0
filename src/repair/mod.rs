// Repair loop - the bounded state machine that sequences the tools
//
// locate -> {patch -> test -> critique} x N, with reset-on-failure between
// iterations. The decision-making policy lives behind the PolicyActor
// trait; everything here only enforces ordering, budgets, and termination.

mod controller;
mod policy;
mod scripted;
mod state;

pub use controller::RepairController;
pub use policy::{LocateRequest, PatchCommand, PolicyActor, PolicyContext, Verdict};
pub use scripted::{PlannedEdit, RepairPlan, ScriptedActor};
pub use state::{AttemptReport, LoopState, Termination};
