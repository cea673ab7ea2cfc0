// Configuration structs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for repository checkouts, one subdirectory per
    /// normalized repository identity.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Cache of per-repository runtimes (virtualenvs), reused across
    /// attempts. Keyed by repository identity, not revision.
    #[serde(default = "default_runtime_cache_dir")]
    pub runtime_cache_dir: PathBuf,

    /// Maximum patch/test/critique cycles before the attempt is declared
    /// exhausted.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Deadline for provisioning steps (fetch, venv creation, installs).
    #[serde(default = "default_provision_timeout_secs")]
    pub provision_timeout_secs: u64,

    /// Deadline for short commands (git plumbing, search backend).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Deadline for one test-suite run.
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,

    /// Ceiling on the captured test log; longer output keeps a head and a
    /// tail segment around a truncation marker.
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: usize,

    /// Maximum added-plus-deleted content lines a strict-mode diff may
    /// touch.
    #[serde(default = "default_diff_line_budget")]
    pub diff_line_budget: usize,

    /// Arguments prepended to the workspace runtime when running tests.
    /// Test selectors from the caller are appended after these.
    #[serde(default = "default_test_runner_args")]
    pub test_runner_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            runtime_cache_dir: default_runtime_cache_dir(),
            max_iterations: default_max_iterations(),
            provision_timeout_secs: default_provision_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            max_log_bytes: default_max_log_bytes(),
            diff_line_budget: default_diff_line_budget(),
            test_runner_args: default_test_runner_args(),
        }
    }
}

impl Config {
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("mend")
}

fn default_runtime_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mend")
        .join("runtimes")
}

fn default_max_iterations() -> u32 {
    4
}

fn default_provision_timeout_secs() -> u64 {
    600
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_test_timeout_secs() -> u64 {
    900
}

fn default_max_log_bytes() -> usize {
    20_000
}

fn default_diff_line_budget() -> usize {
    1
}

fn default_test_runner_args() -> Vec<String> {
    vec!["-m".to_string(), "pytest".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.diff_line_budget, 1);
        assert_eq!(config.max_log_bytes, 20_000);
        assert_eq!(config.test_runner_args, vec!["-m", "pytest"]);
        assert_eq!(config.test_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            max_iterations = 8
            diff_line_budget = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.diff_line_budget, 2);
        // Untouched fields keep their defaults
        assert_eq!(config.max_log_bytes, 20_000);
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
    }
}
