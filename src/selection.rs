//! Turns a local directory into the ordered entries the tree builder takes.

use anyhow::{bail, Context, Result};
use std::path::{Component, Path};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// Collects every file below `dir` as `<dir-name>/<sub>/<file>`.
///
/// Entries are sorted by file name at each level, so files sharing a folder
/// are contiguous. Separators are always `/`. Symlinks are not followed.
///
/// # Errors
///
/// Returns an error if `dir` is missing, unreadable, or holds no files.
pub fn collect_entries(dir: &Path, skip_hidden: bool) -> Result<Vec<String>> {
    let root = std::fs::canonicalize(dir)
        .with_context(|| format!("Failed to open directory: {}", dir.display()))?;
    if !root.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let root_name = root
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Directory has no usable name: {}", root.display()))?
        .to_string();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(skip_hidden && is_hidden(entry)));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&root)
            .with_context(|| format!("Entry outside selection: {}", entry.path().display()))?;
        entries.push(to_entry(&root_name, relative)?);
    }

    if entries.is_empty() {
        bail!("No files found in {}", dir.display());
    }
    Ok(entries)
}

fn to_entry(root_name: &str, relative: &Path) -> Result<String> {
    let mut segments = vec![root_name.to_string()];
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        let segment = segment
            .to_str()
            .with_context(|| format!("Path is not valid UTF-8: {}", relative.display()))?;
        segments.push(segment.to_string());
    }
    Ok(segments.join("/"))
}
