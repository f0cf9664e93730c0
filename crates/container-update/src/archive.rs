//! Tar archives for container syncs.
//!
//! Archives are plain (uncompressed) tar streams whose entry names are
//! container-absolute paths without the leading slash, so unpacking at
//! `/` lands every file in place.

use std::fs;
use std::io;
use std::path::PathBuf;

/// A local path and the container path it lands on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapping {
    pub local_path: PathBuf,
    pub container_path: String,
}

impl PathMapping {
    pub fn pretty(&self) -> String {
        format!("{} → {}", self.local_path.display(), self.container_path)
    }
}

/// Build a tar archive of the given mappings. Directories are archived
/// recursively; file modes are preserved.
pub fn tar_archive_for_paths(mappings: &[PathMapping]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(true);

    for mapping in mappings {
        let name = mapping.container_path.trim_start_matches('/');
        let metadata = fs::metadata(&mapping.local_path)?;
        if metadata.is_dir() {
            builder.append_dir_all(name, &mapping.local_path)?;
        } else {
            builder.append_path_with_name(&mapping.local_path, name)?;
        }
    }

    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        let mut ar = tar::Archive::new(archive);
        for entry in ar.entries().expect("entries") {
            let entry = entry.expect("entry");
            out.push(entry.path().expect("path").display().to_string());
        }
        out
    }

    #[test]
    fn archives_files_under_container_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = dir.path().join("main.go");
        fs::write(&local, b"package main\n").expect("write");

        let archive = tar_archive_for_paths(&[PathMapping {
            local_path: local,
            container_path: "/app/src/main.go".to_string(),
        }])
        .expect("archive");

        assert_eq!(entry_names(&archive), vec!["app/src/main.go".to_string()]);
    }

    #[test]
    fn preserves_file_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = dir.path().join("config.yaml");
        fs::write(&local, b"replicas: 3\n").expect("write");

        let archive = tar_archive_for_paths(&[PathMapping {
            local_path: local,
            container_path: "/etc/app/config.yaml".to_string(),
        }])
        .expect("archive");

        let mut ar = tar::Archive::new(&archive[..]);
        let mut entry = ar.entries().expect("entries").next().expect("one entry").expect("entry");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read");
        assert_eq!(contents, "replicas: 3\n");
    }

    #[test]
    fn archives_directories_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let subdir = dir.path().join("static");
        fs::create_dir(&subdir).expect("mkdir");
        fs::write(subdir.join("index.html"), b"<html/>").expect("write");

        let archive = tar_archive_for_paths(&[PathMapping {
            local_path: subdir,
            container_path: "/srv/static".to_string(),
        }])
        .expect("archive");

        let names = entry_names(&archive);
        assert!(
            names.iter().any(|n| n.trim_end_matches('/') == "srv/static"),
            "missing directory entry in {names:?}"
        );
        assert!(
            names.contains(&"srv/static/index.html".to_string()),
            "missing file entry in {names:?}"
        );
    }

    #[test]
    fn missing_local_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = tar_archive_for_paths(&[PathMapping {
            local_path: dir.path().join("gone.txt"),
            container_path: "/tmp/gone.txt".to_string(),
        }]);
        assert!(err.is_err());
    }
}
