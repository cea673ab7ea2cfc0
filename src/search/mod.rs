// Code search - locate candidate edit sites by pattern
//
// One capability, two interchangeable backends chosen by availability
// probing at startup: ripgrep when the binary is present, a plain recursive
// scan otherwise. Both return the first matching line per scanned file and
// walk the same file set (hidden entries skipped, ignore files not
// honored); only the ordering of hits may differ between them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{RepairError, Result};
use crate::process;

/// A located candidate edit site. Ordering is discovery order, not
/// relevance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    /// 1-based line number of the first match in this file.
    pub line: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Ripgrep,
    Scan,
}

pub struct SearchEngine {
    backend: SearchBackend,
    timeout: Duration,
}

impl SearchEngine {
    /// Probe for ripgrep once; fall back to the recursive scan.
    pub async fn detect(timeout: Duration) -> Self {
        let probe = process::run("rg", &["--version"], Path::new("."), None, timeout).await;
        let backend = match probe {
            Ok(out) if out.success() => SearchBackend::Ripgrep,
            _ => SearchBackend::Scan,
        };
        debug!(?backend, "search backend selected");
        Self { backend, timeout }
    }

    pub fn with_backend(backend: SearchBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend(&self) -> SearchBackend {
        self.backend
    }

    /// Find the first line containing `pattern` (plain substring) in each
    /// file under `roots`. Empty roots or zero matches return an empty
    /// vec; unreadable and binary files are skipped silently.
    pub async fn search(&self, pattern: &str, roots: &[PathBuf]) -> Result<Vec<SearchHit>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        match self.backend {
            SearchBackend::Ripgrep => self.ripgrep(pattern, roots).await,
            SearchBackend::Scan => Ok(scan(pattern, roots)),
        }
    }

    async fn ripgrep(&self, pattern: &str, roots: &[PathBuf]) -> Result<Vec<SearchHit>> {
        // --no-ignore keeps the file set in step with the scan backend,
        // which does not read ignore files either.
        let mut args = vec![
            "--json",
            "--fixed-strings",
            "--no-ignore",
            "--max-count",
            "1",
            "-e",
            pattern,
        ];
        let root_args: Vec<String> = roots
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect();
        args.extend(root_args.iter().map(String::as_str));

        let out = process::run("rg", &args, Path::new("."), None, self.timeout).await?;
        // rg exits 0 on matches, 1 on no matches; anything else is a
        // backend failure.
        if out.exit_code != 0 && out.exit_code != 1 {
            return Err(RepairError::Search(out.message()));
        }

        let mut hits = Vec::new();
        for raw in out.stdout.lines() {
            let Ok(event) = serde_json::from_str::<serde_json::Value>(raw) else {
                continue;
            };
            if event["type"] != "match" {
                continue;
            }
            let data = &event["data"];
            let (Some(path), Some(line), Some(text)) = (
                data["path"]["text"].as_str(),
                data["line_number"].as_u64(),
                data["lines"]["text"].as_str(),
            ) else {
                continue;
            };
            hits.push(SearchHit {
                path: path.to_string(),
                line: line as usize,
                snippet: text.trim_end_matches(['\n', '\r']).to_string(),
            });
        }
        Ok(hits)
    }
}

/// Recursive-scan fallback: first substring match per regular file.
fn scan(pattern: &str, roots: &[PathBuf]) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            // Binary or unreadable files are skipped, not reported.
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in contents.lines().enumerate() {
                if line.contains(pattern) {
                    hits.push(SearchHit {
                        path: entry.path().display().to_string(),
                        line: idx + 1,
                        snippet: line.to_string(),
                    });
                    break;
                }
            }
        }
    }
    hits
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
