// Patch application - one atomic edit at a time
//
// Two modes over the same result type:
//
//   apply_line_edit  replace exactly one 1-based line, generating the
//                    unified diff as a side effect
//   apply_diff       accept a full unified diff under a strict
//                    change-size budget and apply it with git, reverting
//                    on failure
//
// Both guarantee: applied == true means the working tree reflects exactly
// the described edit; applied == false (or an error) means the tree is
// unchanged.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RepairError, Result};
use crate::process;

/// Outcome of one atomic edit attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchResult {
    /// Target file, relative to the workspace root when known.
    pub file: String,
    /// 1-based line the edit starts at (0 when it could not be derived).
    pub line: usize,
    /// Unified diff describing the edit.
    pub diff: String,
    pub applied: bool,
    pub message: String,
}

pub struct PatchApplier {
    /// Maximum added-plus-deleted content lines for strict mode.
    budget: usize,
    timeout: Duration,
}

impl PatchApplier {
    pub fn new(budget: usize, timeout: Duration) -> Self {
        Self { budget, timeout }
    }

    /// Replace exactly line `line` (1-based) of `file` with `new_text`,
    /// normalized to the line's original ending. Single location, single
    /// line: replacement text spanning several lines is rejected before
    /// anything is written, and every other line keeps its original bytes.
    pub async fn apply_line_edit(
        &self,
        root: &Path,
        file: &str,
        line: usize,
        new_text: &str,
    ) -> Result<PatchResult> {
        let path = root.join(file);
        if !path.is_file() {
            return Err(RepairError::NotFound(file.to_string()));
        }

        let original = fs::read_to_string(&path)?;
        let lines: Vec<&str> = original.lines().collect();
        if line == 0 || line > lines.len() {
            return Err(RepairError::Range {
                file: file.to_string(),
                line,
                total: lines.len(),
            });
        }

        let replacement = new_text.trim_end_matches(['\n', '\r']);
        if replacement.contains('\n') {
            return Err(RepairError::SizeBudgetExceeded {
                changed: replacement.lines().count() + 1,
                limit: 1,
            });
        }

        // Rebuild around the target line only: untouched lines keep their
        // original bytes, CRLF endings included.
        let ending = match original.split_inclusive('\n').nth(line - 1) {
            Some(s) if s.ends_with("\r\n") => "\r\n",
            Some(s) if s.ends_with('\n') => "\n",
            _ => "",
        };
        let new_segment = format!("{replacement}{ending}");
        let mut segments: Vec<&str> = original.split_inclusive('\n').collect();
        segments[line - 1] = &new_segment;
        let updated: String = segments.concat();

        if updated == original {
            return Ok(PatchResult {
                file: file.to_string(),
                line,
                diff: String::new(),
                applied: true,
                message: "no changes".to_string(),
            });
        }

        let diff = unified_diff(file, &lines, line, replacement);

        // Write through a temp file in the same directory so a failed
        // write never leaves a half-written target behind.
        let tmp = path.with_extension("mend-tmp");
        if let Err(e) = fs::write(&tmp, &updated) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, &path)?;

        debug!(file, line, "line edit applied");
        Ok(PatchResult {
            file: file.to_string(),
            line,
            diff,
            applied: true,
            message: "applied cleanly".to_string(),
        })
    }

    /// Strict mode: apply a full unified diff with `git apply`, but only
    /// when its added-plus-deleted content lines fit the budget. An
    /// over-budget diff is rejected without touching the filesystem. A
    /// failed apply that left changes behind is reverted with
    /// `git apply -R`; if even that fails the tree state is unknown and
    /// the caller gets `CompensationFailed`.
    pub async fn apply_diff(&self, root: &Path, diff: &str) -> Result<PatchResult> {
        let (added, deleted) = count_changed_lines(diff);
        let (file, line) = diff_target(diff);

        if added + deleted > self.budget {
            let err = RepairError::SizeBudgetExceeded {
                changed: added + deleted,
                limit: self.budget,
            };
            return Ok(PatchResult {
                file,
                line,
                diff: diff.to_string(),
                applied: false,
                message: err.to_string(),
            });
        }

        let before = self.tree_state(root).await?;

        let apply = process::run(
            "git",
            &["apply", "--whitespace=nowarn", "-"],
            root,
            Some(diff),
            self.timeout,
        )
        .await?;

        if apply.success() {
            debug!(file, "diff applied cleanly");
            return Ok(PatchResult {
                file,
                line,
                diff: diff.to_string(),
                applied: true,
                message: "applied cleanly".to_string(),
            });
        }

        // Apply failed. If it mutated anything, compensate before
        // reporting the failure.
        let after = self.tree_state(root).await?;
        if after != before {
            warn!(file, "partial apply detected, reverting");
            let reverted = process::run(
                "git",
                &["apply", "-R", "--whitespace=nowarn", "-"],
                root,
                Some(diff),
                self.timeout,
            )
            .await;
            let restored = match reverted {
                Ok(_) => self.tree_state(root).await? == before,
                Err(_) => false,
            };
            if !restored {
                return Err(RepairError::CompensationFailed(apply.message()));
            }
        }

        Ok(PatchResult {
            file,
            line,
            diff: diff.to_string(),
            applied: false,
            message: apply.message(),
        })
    }

    /// Snapshot of the working tree used to detect partial applies.
    async fn tree_state(&self, root: &Path) -> Result<String> {
        let out = process::run("git", &["status", "--porcelain"], root, None, self.timeout)
            .await?;
        if !out.success() {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, out.message()).into());
        }
        Ok(out.stdout)
    }
}

/// Single-hunk unified diff for a one-line substitution, with up to three
/// context lines on each side.
fn unified_diff(file: &str, old_lines: &[&str], line: usize, replacement: &str) -> String {
    const CONTEXT: usize = 3;
    let idx = line - 1;
    let start = idx.saturating_sub(CONTEXT);
    let end = (idx + 1 + CONTEXT).min(old_lines.len());
    let count = end - start;

    let mut diff = format!(
        "--- a/{file}\n+++ b/{file}\n@@ -{},{} +{},{} @@\n",
        start + 1,
        count,
        start + 1,
        count,
    );
    for i in start..idx {
        diff.push(' ');
        diff.push_str(old_lines[i]);
        diff.push('\n');
    }
    diff.push('-');
    diff.push_str(old_lines[idx]);
    diff.push('\n');
    diff.push('+');
    diff.push_str(replacement);
    diff.push('\n');
    for i in (idx + 1)..end {
        diff.push(' ');
        diff.push_str(old_lines[i]);
        diff.push('\n');
    }
    diff
}

/// (#added, #deleted) content lines, excluding the `+++`/`---` file
/// headers.
pub fn count_changed_lines(diff: &str) -> (usize, usize) {
    let added = diff
        .lines()
        .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
        .count();
    let deleted = diff
        .lines()
        .filter(|l| l.starts_with('-') && !l.starts_with("---"))
        .count();
    (added, deleted)
}

/// Best-effort target (file, first hunk line) parsed from the diff
/// headers. Missing headers yield ("", 0) rather than an error.
fn diff_target(diff: &str) -> (String, usize) {
    let file = diff
        .lines()
        .find_map(|l| l.strip_prefix("+++ "))
        .map(|rest| rest.trim().trim_start_matches("b/").to_string())
        .unwrap_or_default();

    let line = diff
        .lines()
        .find(|l| l.starts_with("@@"))
        .and_then(|header| {
            header
                .split_whitespace()
                .find(|part| part.starts_with('-'))
                .and_then(|part| {
                    part.trim_start_matches('-')
                        .split(',')
                        .next()
                        .and_then(|n| n.parse().ok())
                })
        })
        .unwrap_or(0);

    (file, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIMIT: Duration = Duration::from_secs(30);

    fn applier() -> PatchApplier {
        PatchApplier::new(1, LIMIT)
    }

    /// File whose line 42 reads `return x - 1`.
    fn forty_two_line_file() -> String {
        let mut body = String::new();
        for i in 1..=50 {
            if i == 42 {
                body.push_str("return x - 1\n");
            } else {
                body.push_str(&format!("line {i}\n"));
            }
        }
        body
    }

    #[tokio::test]
    async fn test_line_edit_scenario_line_42() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("foo.py"), forty_two_line_file()).unwrap();

        let result = applier()
            .apply_line_edit(dir.path(), "foo.py", 42, "return x + 1")
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(result.line, 42);

        let minus: Vec<&str> = result
            .diff
            .lines()
            .filter(|l| l.starts_with('-') && !l.starts_with("---"))
            .collect();
        let plus: Vec<&str> = result
            .diff
            .lines()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .collect();
        assert_eq!(minus, vec!["-return x - 1"]);
        assert_eq!(plus, vec!["+return x + 1"]);

        let updated = fs::read_to_string(dir.path().join("foo.py")).unwrap();
        assert_eq!(updated.lines().nth(41).unwrap(), "return x + 1");
    }

    #[tokio::test]
    async fn test_line_edit_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = applier()
            .apply_line_edit(dir.path(), "nope.py", 1, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_line_edit_out_of_range_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.py"), "one\ntwo\n").unwrap();

        for bad in [0usize, 3, 99] {
            let err = applier()
                .apply_line_edit(dir.path(), "f.py", bad, "x")
                .await
                .unwrap_err();
            assert!(matches!(err, RepairError::Range { .. }), "line {bad}");
        }
        assert_eq!(fs::read_to_string(dir.path().join("f.py")).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_line_edit_rejects_multiline_replacement() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.py"), "one\ntwo\n").unwrap();
        let err = applier()
            .apply_line_edit(dir.path(), "f.py", 1, "a\nb\nc")
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::SizeBudgetExceeded { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("f.py")).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_line_edit_normalizes_trailing_newline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.py"), "one\ntwo\n").unwrap();
        let result = applier()
            .apply_line_edit(dir.path(), "f.py", 2, "TWO\n")
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(fs::read_to_string(dir.path().join("f.py")).unwrap(), "one\nTWO\n");
    }

    #[tokio::test]
    async fn test_line_edit_preserves_crlf_on_untouched_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.py"), "one\r\ntwo\r\nthree\r\n").unwrap();
        let result = applier()
            .apply_line_edit(dir.path(), "f.py", 2, "TWO")
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("f.py")).unwrap(),
            "one\r\nTWO\r\nthree\r\n"
        );
    }

    #[tokio::test]
    async fn test_line_edit_keeps_missing_final_newline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.py"), "one\ntwo").unwrap();
        let result = applier()
            .apply_line_edit(dir.path(), "f.py", 2, "TWO")
            .await
            .unwrap();
        assert!(result.applied);
        assert_eq!(fs::read_to_string(dir.path().join("f.py")).unwrap(), "one\nTWO");
    }

    #[test]
    fn test_count_changed_lines_excludes_headers() {
        let diff = "--- a/f.py\n+++ b/f.py\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        assert_eq!(count_changed_lines(diff), (1, 1));

        let multi = "@@ -1,3 +1,2 @@\n-a\n-b\n+c\n";
        assert_eq!(count_changed_lines(multi), (1, 2));
    }

    #[test]
    fn test_diff_target_parses_headers() {
        let diff = "--- a/src/f.py\n+++ b/src/f.py\n@@ -42,7 +42,7 @@\n-x\n+y\n";
        assert_eq!(diff_target(diff), ("src/f.py".to_string(), 42));
        assert_eq!(diff_target("garbage"), (String::new(), 0));
    }

    async fn git_repo_with(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        for args in [
            vec!["init", "--quiet"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "t"],
        ] {
            let out = process::run("git", &args, &root, None, LIMIT).await.unwrap();
            assert!(out.success(), "{:?}: {}", args, out.message());
        }
        fs::write(root.join("f.py"), content).unwrap();
        for args in [vec!["add", "."], vec!["commit", "--quiet", "-m", "seed"]] {
            let out = process::run("git", &args, &root, None, LIMIT).await.unwrap();
            assert!(out.success(), "{:?}: {}", args, out.message());
        }
        (dir, root)
    }

    #[tokio::test]
    async fn test_apply_diff_over_budget_rejected_without_mutation() {
        let (_dir, root) = git_repo_with("a\nb\nc\n").await;
        let diff = "--- a/f.py\n+++ b/f.py\n@@ -1,3 +1,2 @@\n-a\n-b\n+ab\n c\n";

        // (1 added + 2 deleted) > limit for every limit in 0..=2
        for limit in 0..=2usize {
            let applier = PatchApplier::new(limit, LIMIT);
            let result = applier.apply_diff(&root, diff).await.unwrap();
            assert!(!result.applied, "limit {limit}");
            assert!(result.message.contains("limit is"));
            assert_eq!(fs::read_to_string(root.join("f.py")).unwrap(), "a\nb\nc\n");
        }
    }

    #[tokio::test]
    async fn test_apply_diff_single_deletion_within_budget() {
        let (_dir, root) = git_repo_with("a\nb\nc\n").await;
        let diff = "--- a/f.py\n+++ b/f.py\n@@ -1,3 +1,2 @@\n a\n-b\n c\n";

        let result = applier().apply_diff(&root, diff).await.unwrap();
        assert!(result.applied, "{}", result.message);
        assert_eq!(result.file, "f.py");
        assert_eq!(fs::read_to_string(root.join("f.py")).unwrap(), "a\nc\n");
    }

    #[tokio::test]
    async fn test_apply_diff_mismatch_fails_and_tree_unchanged() {
        let (_dir, root) = git_repo_with("a\nb\nc\n").await;
        // Context expects content the file does not have.
        let diff = "--- a/f.py\n+++ b/f.py\n@@ -1,2 +1,1 @@\n x\n-y\n";

        let result = applier().apply_diff(&root, diff).await.unwrap();
        assert!(!result.applied);
        assert!(!result.message.is_empty());
        assert_eq!(fs::read_to_string(root.join("f.py")).unwrap(), "a\nb\nc\n");
    }

    #[tokio::test]
    async fn test_unified_diff_roundtrips_through_git_apply() {
        // The diff generated by apply_line_edit must be a valid reverse
        // patch: applying it with -R restores the original file.
        let (_dir, root) = git_repo_with("one\ntwo\nthree\nfour\nfive\n").await;
        let result = applier()
            .apply_line_edit(&root, "f.py", 3, "THREE")
            .await
            .unwrap();
        assert!(result.applied);

        let out = process::run(
            "git",
            &["apply", "-R", "--whitespace=nowarn", "-"],
            &root,
            Some(&result.diff),
            LIMIT,
        )
        .await
        .unwrap();
        assert!(out.success(), "reverse apply failed: {}", out.message());
        assert_eq!(
            fs::read_to_string(root.join("f.py")).unwrap(),
            "one\ntwo\nthree\nfour\nfive\n"
        );
    }
}
