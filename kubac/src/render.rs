//! GitOps repository layout and the Flux manifests that bootstrap it.

use helpers::k8s_helpers::manifests::{manifest_files, ManifestError};
use log::debug;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::config::GitOpsConfig;

pub const FLUX_NAMESPACE: &str = "flux-system";

/// Sub-directories of a GitOps cluster path, one per reconciliation unit.
pub const GITOPS_DIRS: [&str; 5] = ["flux-system", "platform", "policies", "netpol", "apps"];

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Manifests(#[from] ManifestError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn scaffold_gitops(root: &Path) -> Result<(), RenderError> {
    for dir in GITOPS_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path).map_err(io_err(&path))?;
    }
    Ok(())
}

/// Writes `documents` as one multi-document YAML stream.
fn write_documents(path: &Path, documents: &[Value]) -> Result<(), RenderError> {
    let mut out = String::new();
    for doc in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    debug!("writing {}", path.display());
    fs::write(path, out).map_err(io_err(path))
}

fn kustomization(name: &str, path: &str, depends_on: &[&str]) -> Value {
    let mut spec = json!({
        "interval": "10m0s",
        "path": path,
        "prune": true,
        "sourceRef": {"kind": "GitRepository", "name": FLUX_NAMESPACE},
    });
    if !depends_on.is_empty() {
        spec["dependsOn"] = depends_on.iter().map(|d| json!({"name": d})).collect();
    }
    json!({
        "apiVersion": "kustomize.toolkit.fluxcd.io/v1",
        "kind": "Kustomization",
        "metadata": {"name": name, "namespace": FLUX_NAMESPACE},
        "spec": spec,
    })
}

/// Renders the Flux bootstrap (`flux-system/gotk-*.yaml`) and the
/// kustomizations that reconcile the platform, policy and netpol trees.
pub fn render_flux(root: &Path, gitops: &GitOpsConfig) -> Result<(), RenderError> {
    let flux_dir = root.join(FLUX_NAMESPACE);

    // the controllers themselves come from `flux install --export`
    let components = json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": FLUX_NAMESPACE},
    });
    write_documents(&flux_dir.join("gotk-components.yaml"), &[components])?;

    let repository = json!({
        "apiVersion": "source.toolkit.fluxcd.io/v1",
        "kind": "GitRepository",
        "metadata": {"name": FLUX_NAMESPACE, "namespace": FLUX_NAMESPACE},
        "spec": {
            "interval": "1m0s",
            "ref": {"branch": gitops.branch},
            "url": gitops.repo_url,
        },
    });
    let sync = kustomization(FLUX_NAMESPACE, gitops.cluster_path(), &[]);
    write_documents(&flux_dir.join("gotk-sync.yaml"), &[repository, sync])?;

    let units = [
        ("platform", &[][..]),
        ("policies", &["platform"][..]),
        ("netpol", &["policies"][..]),
    ];
    for (name, depends_on) in units {
        let doc = kustomization(name, &format!("./{name}"), depends_on);
        write_documents(&root.join(format!("{name}-kustomization.yaml")), &[doc])?;
    }
    Ok(())
}

/// Copies the manifest files of `bundle` into `dest`, returning how many
/// files were copied.
pub fn copy_bundle(bundle: &Path, dest: &Path) -> Result<usize, RenderError> {
    let files = manifest_files(bundle)?;
    fs::create_dir_all(dest).map_err(io_err(dest))?;
    for file in &files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = dest.join(name);
        fs::copy(file, &target).map_err(io_err(&target))?;
    }
    Ok(files.len())
}
