//! Hierarchical view of a flat file selection.
//!
//! The selection source hands over relative paths such as
//! `batch_001/document_002.pdf`. [`build`] folds them into folder/file nodes
//! keeping first-seen order, and [`flatten`] reads the leaves back out in
//! pre-order to produce the ordered work list the runners consume.

use serde::Serialize;
use std::collections::HashMap;

/// Separator between path segments, independent of the host platform.
pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Folder { name: String, children: Vec<TreeNode> },
    File { name: String },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Folder { name, .. } | TreeNode::File { name } => name,
        }
    }
}

/// Intermediate child reference used while the tree is assembled.
///
/// Folders live in an arena so that a folder key can be revisited after
/// siblings have been appended to its parent.
enum Slot {
    Folder(usize),
    File(String),
}

struct FolderSlot {
    name: String,
    children: Vec<Slot>,
}

/// Builds the folder/file tree for an ordered sequence of relative paths.
///
/// Every segment but the last becomes a folder keyed by its cumulative path;
/// a key seen before reuses the existing folder. The last segment is always a
/// file leaf, even when it collides with an earlier folder key.
pub fn build<I, S>(entries: I) -> Vec<TreeNode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut folders: Vec<FolderSlot> = Vec::new();
    let mut folder_index: HashMap<String, usize> = HashMap::new();
    let mut roots: Vec<Slot> = Vec::new();

    for entry in entries {
        let segments: Vec<&str> = entry.as_ref().split(SEPARATOR).collect();
        let Some((file_name, parents)) = segments.split_last() else {
            continue;
        };

        let mut parent: Option<usize> = None;
        let mut key = String::new();
        for segment in parents {
            if !key.is_empty() {
                key.push(SEPARATOR);
            }
            key.push_str(segment);

            let folder = match folder_index.get(&key) {
                Some(&existing) => existing,
                None => {
                    let created = folders.len();
                    folders.push(FolderSlot {
                        name: (*segment).to_string(),
                        children: Vec::new(),
                    });
                    folder_index.insert(key.clone(), created);
                    level(&mut roots, &mut folders, parent).push(Slot::Folder(created));
                    created
                }
            };
            parent = Some(folder);
        }

        level(&mut roots, &mut folders, parent).push(Slot::File((*file_name).to_string()));
    }

    roots
        .into_iter()
        .map(|slot| materialize(slot, &mut folders))
        .collect()
}

fn level<'a>(
    roots: &'a mut Vec<Slot>,
    folders: &'a mut [FolderSlot],
    parent: Option<usize>,
) -> &'a mut Vec<Slot> {
    match parent {
        None => roots,
        Some(index) => &mut folders[index].children,
    }
}

fn materialize(slot: Slot, folders: &mut [FolderSlot]) -> TreeNode {
    match slot {
        Slot::File(name) => TreeNode::File { name },
        Slot::Folder(index) => {
            // Each folder is referenced from exactly one parent, so taking is safe.
            let name = std::mem::take(&mut folders[index].name);
            let children = std::mem::take(&mut folders[index].children)
                .into_iter()
                .map(|child| materialize(child, folders))
                .collect();
            TreeNode::Folder { name, children }
        }
    }
}

/// Returns the full path of every file in pre-order.
pub fn flatten(nodes: &[TreeNode]) -> Vec<String> {
    let mut files = Vec::new();
    flatten_into(nodes, "", &mut files);
    files
}

/// Like [`flatten`], with every path rooted under `prefix`.
pub fn flatten_with_prefix(nodes: &[TreeNode], prefix: &str) -> Vec<String> {
    let mut files = Vec::new();
    flatten_into(nodes, prefix, &mut files);
    files
}

fn flatten_into(nodes: &[TreeNode], prefix: &str, out: &mut Vec<String>) {
    for node in nodes {
        let path = if prefix.is_empty() {
            node.name().to_string()
        } else {
            format!("{}{}{}", prefix, SEPARATOR, node.name())
        };
        match node {
            TreeNode::File { .. } => out.push(path),
            TreeNode::Folder { children, .. } => flatten_into(children, &path, out),
        }
    }
}

/// Number of file leaves under `nodes`.
pub fn file_count(nodes: &[TreeNode]) -> usize {
    nodes
        .iter()
        .map(|node| match node {
            TreeNode::File { .. } => 1,
            TreeNode::Folder { children, .. } => file_count(children),
        })
        .sum()
}

/// Name of the selected root folder: the first segment of the first entry.
pub fn root_name<S: AsRef<str>>(entries: &[S]) -> Option<String> {
    entries
        .first()
        .and_then(|entry| entry.as_ref().split(SEPARATOR).next())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
