//! Turns a raw changed-file set into a sync plan.
//!
//! Every changed file is classified against the spec exactly once: files
//! matching a stop path land in `stop_paths`, files under a sync's local
//! root land in `sync_paths` (first matching sync wins, container path by
//! prefix substitution), and everything else lands in `no_match_paths`.
//! The caller treats non-empty stop or no-match sets as fatal.

use apis::{LiveUpdateExec, LiveUpdateSpec};
use container_update::{PathMapping, RunStep};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct LiveUpdatePlan {
    /// Changed files and the container paths they sync to.
    pub sync_paths: Vec<PathMapping>,

    /// Commands whose triggers matched, in spec order.
    pub run_steps: Vec<RunStep>,

    /// Changed files matching a stop path.
    pub stop_paths: Vec<String>,

    /// Changed files outside every sync's local root.
    pub no_match_paths: Vec<String>,
}

impl LiveUpdatePlan {
    pub fn new(spec: &LiveUpdateSpec, files_changed: &[String]) -> Result<Self, glob::PatternError> {
        let base = Path::new(&spec.base_path);
        let mut plan = LiveUpdatePlan::default();
        let mut live_files = Vec::new();

        'files: for file in files_changed {
            let file_path = Path::new(file);

            for stop in &spec.stop_paths {
                if path_matches(&resolve(base, stop), file_path)? {
                    plan.stop_paths.push(file.clone());
                    continue 'files;
                }
            }
            live_files.push(file.clone());

            for sync in &spec.syncs {
                let local_root = resolve(base, &sync.local_path);
                if let Ok(rel) = file_path.strip_prefix(&local_root) {
                    plan.sync_paths.push(PathMapping {
                        local_path: file_path.to_path_buf(),
                        container_path: container_join(&sync.container_path, rel),
                    });
                    continue 'files;
                }
            }
            plan.no_match_paths.push(file.clone());
        }

        for exec in &spec.execs {
            if triggered(exec, base, &live_files)? {
                plan.run_steps.push(RunStep {
                    args: exec.args.clone(),
                });
            }
        }

        Ok(plan)
    }
}

/// An exec with no triggers runs on every sync; otherwise any changed
/// file matching any trigger path fires it.
fn triggered(
    exec: &LiveUpdateExec,
    base: &Path,
    files: &[String],
) -> Result<bool, glob::PatternError> {
    if exec.trigger_paths.is_empty() {
        return Ok(true);
    }
    for trigger in &exec.trigger_paths {
        let trigger_path = resolve(base, trigger);
        for file in files {
            if path_matches(&trigger_path, Path::new(file))? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Join a path against the spec's base path unless it is already
/// absolute.
fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// A pattern matches a file when the file is the pattern itself, lives
/// under it, or glob-matches it. Matching is case-sensitive.
fn path_matches(pattern: &Path, file: &Path) -> Result<bool, glob::PatternError> {
    if file.strip_prefix(pattern).is_ok() {
        return Ok(true);
    }
    let pattern = glob::Pattern::new(&pattern.to_string_lossy())?;
    Ok(pattern.matches_path(file))
}

/// Substitute a sync's container root for its local root.
fn container_join(container_root: &str, rel: &Path) -> String {
    let mut out = container_root.trim_end_matches('/').to_string();
    for component in rel.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}
