//! Render an existing code tree back into fenced blocks.
//!
//! Revisions and later milestones hand this snapshot to the coder backend so
//! it can answer with patch units against files that already exist.

use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &[".git", "__pycache__", "node_modules", "venv", ".venv", "target"];

const BINARY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "pdf", "exe", "pyc", "zip"];

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn is_readable_file(entry: &DirEntry) -> bool {
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    let binary = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    !binary
}

/// Render every readable file under `root` as `### File:` plus a fenced block
/// labelled with its relative path.
///
/// Returns `None` when the directory is missing or holds no readable files.
pub fn render_code_tree(root: &Path) -> Option<String> {
    if !root.is_dir() {
        return None;
    }

    let mut sections = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !is_readable_file(&entry) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => sections.push(format!(
                "### File: {rel}\n```{rel}\n{content}\n```\n",
                rel = relative,
                content = content
            )),
            Err(e) => sections.push(format!("### File: {}\nError reading file: {}\n", relative, e)),
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_directory_renders_nothing() {
        let dir = tempdir().unwrap();
        assert!(render_code_tree(&dir.path().join("absent")).is_none());
    }

    #[test]
    fn test_empty_directory_renders_nothing() {
        let dir = tempdir().unwrap();
        assert!(render_code_tree(dir.path()).is_none());
    }

    #[test]
    fn test_renders_files_with_relative_labels() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/app.py"), "print('hi')").unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();

        let rendered = render_code_tree(dir.path()).unwrap();
        assert!(rendered.contains("### File: src/app.py\n```src/app.py\nprint('hi')\n```"));
        assert!(rendered.contains("```README.md\n# readme\n```"));
    }

    #[test]
    fn test_skips_hidden_binary_and_vendor_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        fs::write(dir.path().join("logo.PNG"), "bytes").unwrap();
        fs::write(dir.path().join("main.js"), "run()").unwrap();

        let rendered = render_code_tree(dir.path()).unwrap();
        assert!(rendered.contains("main.js"));
        assert!(!rendered.contains("node_modules"));
        assert!(!rendered.contains("SECRET"));
        assert!(!rendered.contains("logo"));
    }

    #[test]
    fn test_snapshot_parses_back_into_records() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "x = 1").unwrap();
        let rendered = render_code_tree(dir.path()).unwrap();
        let records = crate::materialize::extract_file_records(&rendered);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "app.py");
        assert_eq!(records[0].content, "x = 1\n");
    }
}
