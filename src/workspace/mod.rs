// Workspace management - isolated checkout plus per-repo runtime
//
// Owns the filesystem lifecycle for one bug instance: shallow provisioning
// of exactly one revision, a cached virtualenv keyed by repository identity,
// and hard resets between repair iterations. Every other component only
// ever sees the paths, never the lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{RepairError, Result};
use crate::process::{self, CommandOutput};

/// An isolated repository checkout plus the runtime executable that runs
/// its tests.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Repository root of the checkout.
    pub root: PathBuf,
    /// Python executable of the per-repo virtualenv.
    pub runtime: PathBuf,
    /// Revision the checkout was provisioned at.
    pub revision: String,
}

pub struct WorkspaceManager {
    workspace_root: PathBuf,
    runtime_cache_dir: PathBuf,
    provision_timeout: Duration,
    command_timeout: Duration,
    /// In-process serialization of runtime provisioning per repository
    /// identity. Cross-process callers are serialized by a lock file.
    runtime_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkspaceManager {
    pub fn new(config: &Config) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            runtime_cache_dir: config.runtime_cache_dir.clone(),
            provision_timeout: config.provision_timeout(),
            command_timeout: config.command_timeout(),
            runtime_locks: DashMap::new(),
        }
    }

    /// Shallow-fetch exactly `revision` into a directory keyed by the
    /// normalized repository identity and return the ready workspace.
    ///
    /// Idempotent per (repo, revision, destination): an existing checkout
    /// already at `revision` skips the fetch entirely. Any failure here,
    /// including a timeout, is fatal for the attempt.
    pub async fn provision(&self, repo: &str, revision: &str) -> Result<Workspace> {
        let identity = normalize_identity(repo);
        let src = self.workspace_root.join(&identity).join("src");

        let reuse = if src.join(".git").is_dir() {
            let head = self.git(&src, &["rev-parse", "HEAD"]).await;
            matches!(head, Ok(out) if out.success() && out.stdout.trim() == revision)
        } else {
            false
        };

        if reuse {
            info!(repo, revision, "reusing existing checkout");
        } else {
            std::fs::create_dir_all(&src).map_err(|e| provision_err(e.into()))?;

            if !src.join(".git").is_dir() {
                self.git_checked(&src, &["init", "--quiet"]).await?;
                self.git_checked(&src, &["remote", "add", "origin", &remote_url(repo)])
                    .await?;
            }

            info!(repo, revision, dest = %src.display(), "fetching revision");
            let fetch = process::run(
                "git",
                &["fetch", "--depth", "1", "origin", revision],
                &src,
                None,
                self.provision_timeout,
            )
            .await
            .map_err(provision_err)?;
            if !fetch.success() {
                return Err(RepairError::Provision(fetch.message()));
            }

            self.git_checked(&src, &["checkout", "--quiet", "FETCH_HEAD"])
                .await?;
        }

        let runtime = self.ensure_runtime(&identity, &src).await?;

        Ok(Workspace {
            root: src,
            runtime,
            revision: revision.to_string(),
        })
    }

    /// Return the runtime executable for `identity`, creating the
    /// virtualenv and installing declared dependencies on first use.
    ///
    /// The cache is keyed by repository identity alone, not revision: a
    /// runtime built at one revision is reused for every other. That is a
    /// deliberate trade-off of setup cost over perfect isolation.
    pub async fn ensure_runtime(&self, identity: &str, checkout_root: &Path) -> Result<PathBuf> {
        // Same-identity provisioning must never run twice concurrently.
        let guard = self
            .runtime_locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _in_process = guard.lock().await;

        std::fs::create_dir_all(&self.runtime_cache_dir).map_err(|e| provision_err(e.into()))?;
        let _cross_process = self.lock_cache_entry(identity).await?;

        let venv = self.runtime_cache_dir.join(identity);
        let python = venv.join("bin").join("python");
        if python.is_file() {
            debug!(identity, "runtime cache hit");
            return Ok(python);
        }

        info!(identity, venv = %venv.display(), "creating runtime");
        let venv_arg = venv.to_string_lossy().into_owned();
        let created = process::run(
            "python3",
            &["-m", "venv", &venv_arg],
            &self.runtime_cache_dir,
            None,
            self.provision_timeout,
        )
        .await
        .map_err(provision_err)?;
        if !created.success() {
            return Err(RepairError::Provision(created.message()));
        }

        // Dependency install is best effort: a broken manifest degrades the
        // runtime, it does not kill the attempt.
        if let Some(install_args) = manifest_install_args(checkout_root) {
            let python_arg = python.to_string_lossy().into_owned();
            let args: Vec<&str> = install_args.iter().map(String::as_str).collect();
            match process::run(&python_arg, &args, checkout_root, None, self.provision_timeout)
                .await
            {
                Ok(out) if out.success() => debug!(identity, "dependencies installed"),
                Ok(out) => warn!(identity, "dependency install failed: {}", out.message()),
                Err(e) => warn!(identity, "dependency install failed: {}", e),
            }
        }

        Ok(python)
    }

    /// Discard all uncommitted changes and untracked files, restoring the
    /// working tree to `target` (default: current HEAD). Safe to call
    /// repeatedly and after a partial patch apply; "nothing to reset" is
    /// success, not an error.
    pub async fn reset(&self, workspace: &Workspace, target: Option<&str>) -> Result<String> {
        let target = target.unwrap_or("HEAD");

        let reset = self
            .git(&workspace.root, &["reset", "--hard", target])
            .await
            .map_err(reset_err)?;
        if !reset.success() {
            return Err(RepairError::Reset(reset.message()));
        }

        let clean = self
            .git(&workspace.root, &["clean", "-fd"])
            .await
            .map_err(reset_err)?;
        if !clean.success() {
            return Err(RepairError::Reset(clean.message()));
        }

        let mut message = reset.stdout.trim().to_string();
        if let Ok(head) = self.git(&workspace.root, &["rev-parse", "--short", "HEAD"]).await {
            if head.success() && message.is_empty() {
                message = format!("HEAD is now at {}", head.stdout.trim());
            }
        }
        debug!(root = %workspace.root.display(), target, "workspace reset");
        Ok(message)
    }

    /// Acquire the cross-process lock file for one cache entry. The lock
    /// releases when the returned file handle drops.
    async fn lock_cache_entry(&self, identity: &str) -> Result<std::fs::File> {
        let lock_path = self.runtime_cache_dir.join(format!("{identity}.lock"));
        tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::File::create(&lock_path)?;
            fs2::FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| RepairError::Provision(e.to_string()))?
        .map_err(|e| provision_err(e.into()))
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput> {
        process::run("git", args, cwd, None, self.command_timeout).await
    }

    /// Git helper for provisioning steps: any failure, including a
    /// non-zero exit, becomes a fatal `Provision` error.
    async fn git_checked(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput> {
        let out = self.git(cwd, args).await.map_err(provision_err)?;
        if !out.success() {
            return Err(RepairError::Provision(out.message()));
        }
        Ok(out)
    }
}

/// Filesystem-safe key for a repository locator:
/// "owner/name" becomes "owner__name".
pub fn normalize_identity(repo: &str) -> String {
    let stripped = match repo.split_once("://") {
        Some((_, rest)) => rest,
        None => repo,
    };
    stripped
        .trim_matches('/')
        .replace('/', "__")
        .replace(':', "_")
}

fn remote_url(repo: &str) -> String {
    if repo.contains("://") || repo.starts_with('/') || repo.starts_with('.') {
        repo.to_string()
    } else {
        format!("https://github.com/{repo}.git")
    }
}

/// Pip arguments for whichever dependency manifest the checkout carries.
fn manifest_install_args(checkout_root: &Path) -> Option<Vec<String>> {
    let pip = |tail: &[&str]| {
        let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        args.extend(tail.iter().map(|s| s.to_string()));
        args
    };
    if checkout_root.join("requirements.txt").is_file() {
        Some(pip(&["-r", "requirements.txt"]))
    } else if checkout_root.join("pyproject.toml").is_file()
        || checkout_root.join("setup.py").is_file()
    {
        Some(pip(&["-e", "."]))
    } else {
        None
    }
}

/// Map any provisioning-phase error (timeouts included) to the fatal
/// `Provision` variant.
fn provision_err(e: RepairError) -> RepairError {
    match e {
        RepairError::Provision(_) => e,
        other => RepairError::Provision(other.to_string()),
    }
}

/// A timeout during reset leaves a tree we cannot trust, so it maps to the
/// fatal `Reset` variant rather than staying retryable.
fn reset_err(e: RepairError) -> RepairError {
    match e {
        RepairError::Reset(_) => e,
        other => RepairError::Reset(other.to_string()),
    }
}
