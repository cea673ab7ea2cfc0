// Timeout-bounded subprocess execution
//
// Every external command the core runs (git, the search backend, the test
// runner) goes through here: piped capture, no inherited stdio, and a hard
// deadline after which the child is killed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RepairError, Result};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The most useful text for an error message: stderr when present,
    /// stdout otherwise.
    pub fn message(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }

    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Run `program` with `args` in `cwd`, optionally feeding `stdin`, killing
/// the child if it outlives `limit`.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: &Path,
    stdin: Option<&str>,
    limit: Duration,
) -> Result<CommandOutput> {
    debug!(program, ?args, cwd = %cwd.display(), "spawning subprocess");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(data) = stdin {
        let mut pipe = child.stdin.take().expect("stdin was piped");
        pipe.write_all(data.as_bytes()).await?;
        // Dropping the handle closes the pipe so the child sees EOF.
        drop(pipe);
    }

    // Dropping the wait future on timeout drops the child handle, and
    // kill_on_drop reaps it.
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| RepairError::Timeout(limit))??;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
