//! Loading of static manifest bundles from disk.

use kube::api::DynamicObject;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifests directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// YAML files directly inside `dir`, sorted by file name so bundles can
/// order their objects with numeric prefixes.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let read_dir_err = |source| ManifestError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_dir_err)? {
        let path = entry.map_err(read_dir_err)?.path();
        if path.is_file() && is_manifest(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Splits a multi-document YAML stream into objects, skipping empty documents.
pub fn parse_documents(path: &Path, content: &str) -> Result<Vec<DynamicObject>, ManifestError> {
    let parse_err = |source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_err)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value).map_err(parse_err)?);
    }
    Ok(objects)
}

/// Every object of every manifest file in `dir`, in apply order.
pub fn load_bundle(dir: &Path) -> Result<Vec<DynamicObject>, ManifestError> {
    let mut objects = Vec::new();
    for path in manifest_files(dir)? {
        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        objects.extend(parse_documents(&path, &content)?);
    }
    Ok(objects)
}
