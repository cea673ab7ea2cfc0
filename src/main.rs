// Mend - bounded single-edit program repair
// Main entry point

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mend::config::load_config;
use mend::instance::BugInstance;
use mend::patch::PatchApplier;
use mend::repair::{AttemptReport, RepairController, RepairPlan, ScriptedActor};
use mend::search::SearchEngine;
use mend::testrun::TestExecutor;
use mend::workspace::WorkspaceManager;

#[derive(Debug, Parser)]
#[command(name = "mend", about = "Bounded single-edit program repair")]
struct Args {
    /// Path to a task JSON file (one bug instance row)
    task: PathBuf,

    /// Path to a repair plan JSON file driving the scripted policy actor
    #[arg(long)]
    plan: PathBuf,

    /// Test selectors passed to the runner (repeatable; none = full suite)
    #[arg(long = "test")]
    tests: Vec<String>,

    /// Override the configured iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = load_config()?;
    if let Some(n) = args.max_iterations {
        config.max_iterations = n;
    }

    let task = fs::read_to_string(&args.task)
        .with_context(|| format!("Failed to read task file: {}", args.task.display()))?;
    let instance = BugInstance::from_json(&task)?;

    let plan_text = fs::read_to_string(&args.plan)
        .with_context(|| format!("Failed to read plan file: {}", args.plan.display()))?;
    let actor = ScriptedActor::new(RepairPlan::from_json(&plan_text)?);

    let manager = WorkspaceManager::new(&config);
    let workspace = manager
        .provision(&instance.repo, &instance.base_commit)
        .await
        .with_context(|| format!("Could not provision {}", instance.repo))?;

    let search = SearchEngine::detect(config.command_timeout()).await;
    let patcher = PatchApplier::new(config.diff_line_budget, config.command_timeout());
    let tests = TestExecutor::new(&config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let controller = RepairController::new(
        &manager,
        &search,
        &patcher,
        &tests,
        config.max_iterations,
        cancel,
    );
    let state = controller
        .run(&instance, &workspace, &actor, &args.tests)
        .await;

    let report = AttemptReport::new(&instance.instance_id, &state);
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
