//! Code materialization: turn a backend's free-text answer into files.
//!
//! The coder backend answers with fenced blocks whose opening label is the
//! file path:
//!
//! ````text
//! ```src/server/routes.py
//! def index(): ...
//! ```
//! ````
//!
//! A block body may instead carry one or more patch units against a file
//! written by an earlier milestone:
//!
//! ```text
//! <<<<
//! old text
//! ====
//! new text
//! >>>>
//! ```
//!
//! Units are applied best-effort: a search text that is not found verbatim is
//! skipped and counted in [`ApplyOutcome::unapplied_units`].

pub mod snapshot;

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::MaterializeError;

/// File written when a response contains no file-labelled fence at all.
pub const FALLBACK_FILE_NAME: &str = "generated_code.txt";

/// Bare language tags that mark a generic snippet rather than a file.
const LANGUAGE_TAGS: &[&str] = &[
    "python",
    "javascript",
    "js",
    "ts",
    "typescript",
    "bash",
    "sh",
    "json",
    "yaml",
    "yml",
    "html",
    "css",
    "sql",
    "go",
    "rust",
    "java",
    "cpp",
    "c",
    "ruby",
    "rb",
    "text",
    "plaintext",
    "markdown",
    "md",
    "xml",
    "toml",
];

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^\n`]+)\n(.*?)```").expect("fence pattern is a valid static regex")
});

static PATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<<\n(.*?)\n====\n(.*?)\n>>>>")
        .expect("patch pattern is a valid static regex")
});

/// One file parsed out of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Relative path with `/` separators.
    pub path: String,
    /// Full file body, or a body of patch units.
    pub content: String,
    pub is_patch: bool,
}

/// A single search/replace pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchUnit {
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Whole file (re)written from the record content.
    Written,
    /// Patch units applied to the existing file.
    Patched,
}

/// Result of applying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub path: PathBuf,
    pub mode: ApplyMode,
    pub applied_units: usize,
    pub unapplied_units: usize,
}

/// Result of materializing one response.
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    pub outcomes: Vec<ApplyOutcome>,
    /// True when no file record was found and the whole response was saved as one file.
    pub fallback: bool,
}

impl MaterializeReport {
    pub fn files_written(&self) -> usize {
        self.outcomes.len()
    }

    pub fn unapplied_units(&self) -> usize {
        self.outcomes.iter().map(|o| o.unapplied_units).sum()
    }
}

/// Whether a fence label names a file rather than a language.
fn is_file_label(label: &str) -> bool {
    if LANGUAGE_TAGS.contains(&label.to_lowercase().as_str()) {
        return false;
    }
    label.contains('.') || label.contains('/') || label.contains('\\')
}

/// Normalize a fence label to a relative `/`-separated path.
///
/// Both separators are accepted and leading separators are dropped. Labels
/// that climb out of the root (`..`) or carry a drive prefix are rejected.
pub fn normalize_label(label: &str) -> Result<String, MaterializeError> {
    let unified = label.trim().replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(MaterializeError::UnsafePath {
                    label: label.to_string(),
                });
            }
            p if p.ends_with(':') => {
                return Err(MaterializeError::UnsafePath {
                    label: label.to_string(),
                });
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return Err(MaterializeError::UnsafePath {
            label: label.to_string(),
        });
    }
    Ok(parts.join("/"))
}

/// Parse every file-labelled fence in a response.
pub fn extract_file_records(raw: &str) -> Vec<FileRecord> {
    let mut records = Vec::new();
    for caps in FENCE_RE.captures_iter(raw) {
        let label = caps[1].trim();
        if !is_file_label(label) {
            continue;
        }
        let path = match normalize_label(label) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(label, error = %e, "Skipping fenced block");
                continue;
            }
        };
        let content = caps[2].to_string();
        let is_patch = !parse_patch_units(&content).is_empty();
        records.push(FileRecord {
            path,
            content,
            is_patch,
        });
    }
    records
}

/// Parse the patch units of a block body, in order.
pub fn parse_patch_units(content: &str) -> Vec<PatchUnit> {
    PATCH_RE
        .captures_iter(content)
        .map(|caps| PatchUnit {
            search: caps[1].to_string(),
            replace: caps[2].to_string(),
        })
        .collect()
}

/// Apply patch units to text, replacing the first occurrence of each search
/// text. Returns the new text and the number of units applied.
pub fn apply_patch_units(original: &str, units: &[PatchUnit]) -> (String, usize) {
    let mut text = original.to_string();
    let mut applied = 0;
    for unit in units {
        if text.contains(&unit.search) {
            text = text.replacen(&unit.search, &unit.replace, 1);
            applied += 1;
        } else {
            tracing::warn!(
                search = %unit.search.lines().next().unwrap_or_default(),
                "Patch search text not found, skipping unit"
            );
        }
    }
    (text, applied)
}

fn write_file(path: &Path, content: &str) -> Result<(), MaterializeError> {
    let io_err = |source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)
}

/// Apply one record beneath `root`.
///
/// Patch units are applied when present and the target already exists.
/// Otherwise the record content is written as the whole file.
pub fn apply_record(record: &FileRecord, root: &Path) -> Result<ApplyOutcome, MaterializeError> {
    let relative = Path::new(&record.path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(MaterializeError::UnsafePath {
            label: record.path.clone(),
        });
    }
    let target = root.join(relative);

    let units = parse_patch_units(&record.content);
    if !units.is_empty() && target.is_file() {
        let current = std::fs::read_to_string(&target).map_err(|source| MaterializeError::Io {
            path: target.clone(),
            source,
        })?;
        let (patched, applied) = apply_patch_units(&current, &units);
        write_file(&target, &patched)?;
        return Ok(ApplyOutcome {
            path: target,
            mode: ApplyMode::Patched,
            applied_units: applied,
            unapplied_units: units.len() - applied,
        });
    }

    if !units.is_empty() {
        tracing::warn!(path = %record.path, "Patch target does not exist, writing content as a new file");
    }
    write_file(&target, &record.content)?;
    Ok(ApplyOutcome {
        path: target,
        mode: ApplyMode::Written,
        applied_units: 0,
        unapplied_units: 0,
    })
}

/// Parse a response and write every file it names beneath `root`.
pub fn materialize(raw: &str, root: &Path) -> Result<MaterializeReport, MaterializeError> {
    let records = extract_file_records(raw);

    if records.is_empty() {
        let path = root.join(FALLBACK_FILE_NAME);
        write_file(&path, raw)?;
        tracing::warn!(path = %path.display(), "No file blocks found, saved whole response");
        return Ok(MaterializeReport {
            outcomes: vec![ApplyOutcome {
                path,
                mode: ApplyMode::Written,
                applied_units: 0,
                unapplied_units: 0,
            }],
            fallback: true,
        });
    }

    let mut report = MaterializeReport::default();
    for record in &records {
        let outcome = apply_record(record, root)?;
        tracing::debug!(path = %record.path, mode = ?outcome.mode, "Materialized file");
        report.outcomes.push(outcome);
    }
    Ok(report)
}
