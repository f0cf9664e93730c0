//! Local → container path bookkeeping for the updater.

use container_update::PathMapping;
use std::io;

/// Split sync mappings by what happened locally: a file that no longer
/// exists becomes a container delete, an existing file becomes an archive
/// entry.
pub fn missing_local_paths(
    mappings: &[PathMapping],
) -> io::Result<(Vec<PathMapping>, Vec<PathMapping>)> {
    let mut to_remove = Vec::new();
    let mut to_archive = Vec::new();
    for mapping in mappings {
        match std::fs::metadata(&mapping.local_path) {
            Ok(_) => to_archive.push(mapping.clone()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => to_remove.push(mapping.clone()),
            Err(err) => return Err(err),
        }
    }
    Ok((to_remove, to_archive))
}

const MAX_FILES_TO_SHOW: usize = 3;

/// Short human-readable rendering of a changed-file list.
pub fn format_file_change_list(paths: &[String]) -> String {
    let shown: Vec<&str> = paths
        .iter()
        .take(MAX_FILES_TO_SHOW)
        .map(String::as_str)
        .collect();
    let mut out = shown.join(", ");
    if paths.len() > MAX_FILES_TO_SHOW {
        out.push_str(&format!(" (+{} more)", paths.len() - MAX_FILES_TO_SHOW));
    }
    out
}
