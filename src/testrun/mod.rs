// Test execution - run the workspace's suite in its own runtime
//
// Invokes the provisioned runtime as an isolated subprocess (explicit cwd,
// no ambient process state), captures combined output under a size
// ceiling, and extracts a pass/fail summary by pattern matching. Summary
// parsing degrades to zero counts instead of failing: a log we cannot
// parse is still a log.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::process;
use crate::workspace::Workspace;

pub const TRUNCATION_MARKER: &str = "[... output truncated ...]";

/// Outcome of one test-suite execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Raw process exit code (0 = everything the runner selected passed).
    pub exit_code: i32,
    /// Best-effort parse of the summary; 0 when the pattern was absent.
    pub passed: usize,
    pub failed: usize,
    /// Combined output, truncated head+tail when over the ceiling.
    pub log: String,
}

pub struct TestExecutor {
    runner_args: Vec<String>,
    max_log_bytes: usize,
    timeout: Duration,
}

impl TestExecutor {
    pub fn new(config: &Config) -> Self {
        Self {
            runner_args: config.test_runner_args.clone(),
            max_log_bytes: config.max_log_bytes,
            timeout: config.test_timeout(),
        }
    }

    /// Run the suite (or just `selectors`, when non-empty) inside the
    /// workspace. A timeout surfaces as `RepairError::Timeout`, which the
    /// controller treats as a retryable iteration failure.
    pub async fn run(&self, workspace: &Workspace, selectors: &[String]) -> Result<TestResult> {
        let program = workspace.runtime.to_string_lossy().into_owned();
        let mut args: Vec<&str> = self.runner_args.iter().map(String::as_str).collect();
        args.extend(selectors.iter().map(String::as_str));

        info!(runtime = %workspace.runtime.display(), ?selectors, "running tests");
        let out = process::run(&program, &args, &workspace.root, None, self.timeout).await?;

        let log = truncate_log(&out.combined(), self.max_log_bytes);
        let (passed, failed) = parse_summary(&log);
        debug!(exit_code = out.exit_code, passed, failed, "test run finished");

        Ok(TestResult {
            exit_code: out.exit_code,
            passed,
            failed,
            log,
        })
    }
}

/// Pull (passed, failed) out of the runner's textual summary. The last
/// occurrence wins, since the summary line is at the tail of the log.
/// A missing pattern means 0 for that field, never an error.
fn parse_summary(log: &str) -> (usize, usize) {
    static PASSED: OnceLock<Regex> = OnceLock::new();
    static FAILED: OnceLock<Regex> = OnceLock::new();
    let passed_re = PASSED.get_or_init(|| Regex::new(r"(\d+) passed").expect("static regex"));
    let failed_re = FAILED.get_or_init(|| Regex::new(r"(\d+) failed").expect("static regex"));

    let last_count = |re: &Regex| {
        re.captures_iter(log)
            .last()
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0)
    };
    (last_count(passed_re), last_count(failed_re))
}

/// Cap `log` at roughly `max` bytes by keeping a head and a tail segment
/// around an explicit marker. The tail keeps the end of the log verbatim,
/// so the final summary line always survives for parsing.
fn truncate_log(log: &str, max: usize) -> String {
    if log.len() <= max {
        return log.to_string();
    }
    let half = max / 2;
    let mut head_end = half.min(log.len());
    while !log.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = log.len() - half.min(log.len());
    while !log.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n{}\n{}",
        &log[..head_end],
        TRUNCATION_MARKER,
        &log[tail_start..]
    )
}
