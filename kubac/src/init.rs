use crate::render::scaffold_gitops;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use types::config::DEFAULT_GITOPS_PATH;
use types::{default_config, write_config, ClusterProfile, InstallMode};

/// Writes a default config to `config_path` and, in GitOps mode, scaffolds
/// the cluster tree below `base`. Returns the scaffolded directory, if any.
pub fn init_project(
    config_path: &Path,
    base: &Path,
    profile: ClusterProfile,
    mode: InstallMode,
) -> Result<Option<PathBuf>> {
    if config_path.exists() {
        bail!(
            "{} already exists, refusing to overwrite",
            config_path.display()
        );
    }

    let config = default_config(profile, mode);
    write_config(config_path, &config)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    println!(
        "✓ Created {} with profile '{profile}' and mode '{mode}'",
        config_path.display()
    );

    if mode != InstallMode::Gitops {
        return Ok(None);
    }

    let root = base.join(config.gitops.cluster_path());
    scaffold_gitops(&root)?;
    println!("✓ Created GitOps directory structure at {}", root.display());
    Ok(Some(root))
}
