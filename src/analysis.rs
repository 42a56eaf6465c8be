//! In-memory corpus analytics.
//!
//! Builds the nested file-tree JSON and the summary statistics stored in
//! the cached repo-metadata blob. Operates purely on the admitted corpus;
//! no disk or network access.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::IngestedFile;

/// Nested file tree from the admitted paths. Directories are objects,
/// files are `null` leaves.
pub fn build_file_tree(files: &[IngestedFile]) -> Value {
    let mut tree = Map::new();
    for file in files {
        let mut current = &mut tree;
        let mut parts = file.path.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                current.insert(part.to_string(), Value::Null);
            } else {
                current = child_dir(current, part);
            }
        }
    }
    Value::Object(tree)
}

fn child_dir<'a>(map: &'a mut Map<String, Value>, name: &str) -> &'a mut Map<String, Value> {
    let entry = map
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(child) => child,
        _ => unreachable!("entry was just made an object"),
    }
}

/// Summary statistics over the admitted corpus: file count, extension
/// histogram, line and byte totals, largest file.
pub fn analyze_corpus(files: &[IngestedFile]) -> Value {
    let mut extensions: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_lines = 0usize;
    let mut total_bytes = 0usize;
    let mut largest_file = String::new();
    let mut largest_size = 0usize;

    for file in files {
        let ext = extension(&file.path);
        *extensions.entry(ext).or_insert(0) += 1;

        let lines = if file.content.is_empty() {
            0
        } else {
            file.content.bytes().filter(|b| *b == b'\n').count() + 1
        };
        total_lines += lines;

        let size = file.content.len();
        total_bytes += size;
        if size > largest_size {
            largest_size = size;
            largest_file = file.path.clone();
        }
    }

    serde_json::json!({
        "num_files": files.len(),
        "file_extensions": extensions,
        "total_lines": total_lines,
        "total_bytes": total_bytes,
        "largest_file": largest_file,
        "largest_file_size": largest_size,
    })
}

fn extension(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => String::new(),
    }
}
