// Error taxonomy for the repair core
//
// Components surface these directly; the repair loop controller translates
// each one into either a failed iteration (reset and continue) or an
// attempt-level abort. Nothing here escapes the controller boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    /// Workspace provisioning (fetch, checkout, or runtime setup) failed.
    /// Always fatal for the attempt.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// A hard reset failed. A workspace that cannot be reset cannot be
    /// trusted for further iterations, so this is fatal too.
    #[error("workspace reset failed: {0}")]
    Reset(String),

    /// Patch target file does not exist in the workspace.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Patch target line is outside the file.
    #[error("line {line} out of range for {file} ({total} lines)")]
    Range {
        file: String,
        line: usize,
        total: usize,
    },

    /// The edit touches more lines than the configured budget allows.
    /// No filesystem mutation has happened when this is returned.
    #[error("patch touches {changed} lines (limit is {limit})")]
    SizeBudgetExceeded { changed: usize, limit: usize },

    /// A failed apply could not be reverted. The working tree is in an
    /// unknown state; the controller must abort after a full reset attempt.
    #[error("compensating revert failed, workspace state unknown: {0}")]
    CompensationFailed(String),

    /// A subprocess exceeded its deadline and was killed.
    #[error("subprocess timed out after {0:?}")]
    Timeout(Duration),

    /// The search backend itself failed (not "no matches", which is Ok).
    #[error("search failed: {0}")]
    Search(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RepairError {
    /// Whether this error invalidates the whole attempt rather than a
    /// single iteration. A `Timeout` is only fatal during provisioning,
    /// and the workspace manager maps it to `Provision` there itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Provision(_) | Self::Reset(_) | Self::CompensationFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;
