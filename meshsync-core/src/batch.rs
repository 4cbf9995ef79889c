//! Batch files: one YAML-encoded [`ChangeBatch`] per `*.yaml` file.
//!
//! Used by the daemon's directory source and by `meshsync apply`.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::types::ChangeBatch;

/// Decode a single batch file.
pub fn load_batch_at(path: &Path) -> Result<ChangeBatch, CoreError> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// List `*.yaml` / `*.yml` files directly under `dir`, sorted by file name.
///
/// Returns an empty list if `dir` does not exist.
pub fn list_batch_files_at(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_batch_file(p))
        .collect();
    files.sort();
    Ok(files)
}

pub fn is_batch_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn list_is_sorted_and_filtered() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("20-second.yaml"), "collection: a\n").unwrap();
        std::fs::write(dir.path().join("10-first.yml"), "collection: a\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = list_batch_files_at(dir.path()).expect("list");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10-first.yml", "20-second.yaml"]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let files = list_batch_files_at(&dir.path().join("absent")).expect("list");
        assert!(files.is_empty());
    }

    #[test]
    fn malformed_batch_reports_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "objects: {not: [a list").unwrap();
        let err = load_batch_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn batch_requires_a_collection() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("anonymous.yaml");
        std::fs::write(&path, "incremental: true\nremoved: [ns/a]\n").unwrap();
        let err = load_batch_at(&path).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));

        std::fs::write(&path, "collection: istio/networking/v1alpha3/sidecars\n").unwrap();
        let batch = load_batch_at(&path).expect("minimal batch");
        assert!(!batch.incremental);
        assert!(batch.objects.is_empty() && batch.removed.is_empty());
    }
}
