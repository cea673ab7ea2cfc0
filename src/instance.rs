// Bug instance - the immutable input to one repair attempt
//
// One row of a bug-report dataset, read from a pre-fetched task JSON file.
// Created once per attempt and never mutated.

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugInstance {
    /// Unique dataset identifier, e.g. "astropy__astropy-12907".
    pub instance_id: String,

    /// Repository locator. Either an "owner/name" slug (fetched from
    /// GitHub) or a full URL / local path.
    pub repo: String,

    /// Revision to check out before patching.
    pub base_commit: String,

    /// Human-readable bug description.
    pub problem_statement: String,

    /// Diff of the failing test(s), when the dataset provides one.
    #[serde(default)]
    pub test_patch: Option<String>,
}

impl BugInstance {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("Failed to parse bug instance JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_row() {
        let row = r#"{
            "instance_id": "demo__demo-1",
            "repo": "demo/demo",
            "base_commit": "abc123",
            "problem_statement": "off-by-one in foo()",
            "test_patch": "--- a/tests/test_foo.py\n+++ b/tests/test_foo.py\n"
        }"#;
        let instance = BugInstance::from_json(row).unwrap();
        assert_eq!(instance.instance_id, "demo__demo-1");
        assert_eq!(instance.repo, "demo/demo");
        assert!(instance.test_patch.is_some());
    }

    #[test]
    fn test_test_patch_is_optional() {
        let row = r#"{
            "instance_id": "demo__demo-2",
            "repo": "demo/demo",
            "base_commit": "def456",
            "problem_statement": "wrong sign"
        }"#;
        let instance = BugInstance::from_json(row).unwrap();
        assert!(instance.test_patch.is_none());
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        assert!(BugInstance::from_json("{\"instance_id\": 42}").is_err());
    }
}
