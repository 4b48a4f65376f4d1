//! Ordered, fail-fast rollout of the platform components.
//!
//! The step catalogue is derived from the configuration on every run. A
//! [`StepExecutor`] decides what "installing" a step means: applying its
//! bundle to the cluster, or rendering it into a GitOps tree.

use crate::render::{self, RenderError};
use helpers::k8s_helpers::manifests::{load_bundle, ManifestError};
use helpers::{poll_immediate, ClusterError, ClusterState, PollTimeout};
use k8s_openapi::api::apps::v1::Deployment;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use types::{Config, ConfigError};

pub const SYSTEM_NAMESPACE: &str = "kubac-system";
pub const POLICY_NAMESPACE: &str = "kyverno";

/// A deployment that has to report ready before the next step starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessCheck {
    pub namespace: String,
    pub deployment: String,
}

impl ReadinessCheck {
    fn deployment(namespace: &str, name: &str) -> Option<Self> {
        Some(ReadinessCheck {
            namespace: namespace.to_string(),
            deployment: name.to_string(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct InstallStep {
    pub name: &'static str,
    /// Directory holding the step's manifests.
    pub bundle: PathBuf,
    /// GitOps sub-directory the step is rendered into.
    pub group: &'static str,
    pub readiness: Option<ReadinessCheck>,
    pub enabled: bool,
}

/// The full catalogue in install order; disabled steps stay in the list.
pub fn platform_steps(config: &Config) -> Vec<InstallStep> {
    let bundles = Path::new(&config.install.bundles_dir);
    let platform = &config.platform;
    let step = |name, bundle: &str, group, readiness, enabled| InstallStep {
        name,
        bundle: bundles.join(bundle),
        group,
        readiness,
        enabled,
    };

    vec![
        step(
            "metrics-server",
            "platform/metrics-server",
            "platform",
            None,
            platform.metrics_server.enabled,
        ),
        step(
            "kube-state-metrics",
            "platform/kube-state-metrics",
            "platform",
            None,
            platform.kube_state_metrics.enabled,
        ),
        step(
            "cert-manager",
            "platform/cert-manager",
            "platform",
            ReadinessCheck::deployment("cert-manager", "cert-manager-webhook"),
            platform.cert_manager.enabled,
        ),
        step(
            "ingress-nginx",
            "platform/ingress-nginx",
            "platform",
            None,
            platform.ingress.enabled && platform.ingress.provider == "nginx",
        ),
        step(
            "prometheus-stack",
            "platform/prometheus-stack",
            "platform",
            None,
            platform.prometheus_stack.enabled,
        ),
        step(
            "kyverno",
            "policies/kyverno",
            "policies",
            ReadinessCheck::deployment(POLICY_NAMESPACE, "kyverno"),
            config.policy.enabled,
        ),
        step(
            "baseline-policies",
            "policies/baseline",
            "policies",
            None,
            config.policy.enabled,
        ),
        step(
            "network-policies",
            "netpol",
            "netpol",
            None,
            config.network_policy.enabled,
        ),
    ]
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Manifests(#[from] ManifestError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("deployment {deployment} not ready: {source}")]
    NotReady {
        deployment: String,
        source: PollTimeout,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("failed to create namespace {namespace}: {source}")]
    Namespace {
        namespace: String,
        source: ClusterError,
    },

    #[error("failed to render GitOps manifests: {0}")]
    Render(#[from] RenderError),

    #[error("failed to install {step}: {source}")]
    Step { step: String, source: StepError },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[allow(async_fn_in_trait)]
pub trait StepExecutor {
    async fn apply(&self, step: &InstallStep) -> Result<(), StepError>;

    async fn wait_ready(&self, check: &ReadinessCheck) -> Result<(), StepError>;

    /// Whether steps wait for their readiness check under this executor.
    fn gates_readiness(&self) -> bool {
        true
    }
}

/// Runs the enabled steps in order and stops at the first failure. Earlier
/// steps are left in place. Returns the number of steps that ran.
pub async fn run_steps<E: StepExecutor>(
    executor: &E,
    steps: &[InstallStep],
) -> Result<usize, InstallError> {
    let mut completed = 0;
    for step in steps {
        if !step.enabled {
            debug!("skipping disabled step {}", step.name);
            continue;
        }
        let wrap = |source| InstallError::Step {
            step: step.name.to_string(),
            source,
        };

        println!("\n→ Installing {}...", step.name);
        executor.apply(step).await.map_err(wrap)?;

        if let Some(check) = step.readiness.as_ref().filter(|_| executor.gates_readiness()) {
            println!("  Waiting for {} to be ready...", step.name);
            executor.wait_ready(check).await.map_err(wrap)?;
        }
        println!("  ✓ {} installed", step.name);
        completed += 1;
    }
    Ok(completed)
}

fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}

/// Applies bundles straight to the cluster.
pub struct DirectExecutor<'a, C> {
    cluster: &'a C,
    interval: Duration,
    timeout: Duration,
}

impl<'a, C: ClusterState> DirectExecutor<'a, C> {
    pub fn new(cluster: &'a C, config: &Config) -> Result<Self, ConfigError> {
        Ok(DirectExecutor {
            cluster,
            interval: config.install.readiness_interval()?,
            timeout: config.install.readiness_timeout()?,
        })
    }
}

impl<C: ClusterState> StepExecutor for DirectExecutor<'_, C> {
    async fn apply(&self, step: &InstallStep) -> Result<(), StepError> {
        let objects = load_bundle(&step.bundle)?;
        info!(
            "applying {} objects from {}",
            objects.len(),
            step.bundle.display()
        );
        for obj in &objects {
            self.cluster.apply(obj).await?;
        }
        Ok(())
    }

    async fn wait_ready(&self, check: &ReadinessCheck) -> Result<(), StepError> {
        let cluster = self.cluster;
        let namespace = check.namespace.as_str();
        let name = check.deployment.as_str();

        poll_immediate(self.interval, self.timeout, move || async move {
            cluster
                .get::<Deployment>(namespace, name)
                .await
                .map(|d| deployment_ready(&d))
        })
        .await
        .map_err(|source| StepError::NotReady {
            deployment: format!("{namespace}/{name}"),
            source,
        })
    }
}

/// Renders bundles into a GitOps tree for an external controller to sync.
pub struct GitOpsExecutor {
    root: PathBuf,
}

impl GitOpsExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        GitOpsExecutor { root: root.into() }
    }
}

impl StepExecutor for GitOpsExecutor {
    async fn apply(&self, step: &InstallStep) -> Result<(), StepError> {
        let dest = self.root.join(step.group).join(step.name);
        let copied = render::copy_bundle(&step.bundle, &dest)?;
        debug!("copied {copied} manifests to {}", dest.display());
        Ok(())
    }

    async fn wait_ready(&self, check: &ReadinessCheck) -> Result<(), StepError> {
        debug!(
            "readiness of {}/{} is left to the GitOps controller",
            check.namespace, check.deployment
        );
        Ok(())
    }

    fn gates_readiness(&self) -> bool {
        false
    }
}

pub async fn install_direct<C: ClusterState>(
    cluster: &C,
    config: &Config,
) -> Result<usize, InstallError> {
    let executor = DirectExecutor::new(cluster, config)?;

    println!("\n→ Creating {SYSTEM_NAMESPACE} namespace...");
    cluster
        .ensure_namespace(SYSTEM_NAMESPACE)
        .await
        .map_err(|source| InstallError::Namespace {
            namespace: SYSTEM_NAMESPACE.to_string(),
            source,
        })?;

    run_steps(&executor, &platform_steps(config)).await
}

/// Writes the GitOps tree below `base` and returns its root.
pub async fn install_gitops(config: &Config, base: &Path) -> Result<PathBuf, InstallError> {
    let root = base.join(config.gitops.cluster_path());

    println!("\n→ Generating GitOps manifests...");
    render::scaffold_gitops(&root)?;
    render::render_flux(&root, &config.gitops)?;
    run_steps(&GitOpsExecutor::new(&root), &platform_steps(config)).await?;
    Ok(root)
}

/// Deletes the namespaces kubac owns. Failures are reported and skipped.
/// Returns the namespaces that were removed.
pub async fn uninstall<C: ClusterState>(cluster: &C, config: &Config) -> Vec<String> {
    let mut namespaces = vec![SYSTEM_NAMESPACE.to_string(), POLICY_NAMESPACE.to_string()];
    if !config.demo.namespace.is_empty() {
        namespaces.push(config.demo.namespace.clone());
    }

    let mut removed = Vec::new();
    for ns in namespaces {
        println!("  Deleting namespace {ns}...");
        match cluster.delete_namespace(&ns).await {
            Ok(()) => removed.push(ns),
            Err(e) if e.is_not_found() => debug!("namespace {ns} already gone"),
            Err(e) => {
                warn!("failed to delete namespace {ns}: {e}");
                println!("  Warning: failed to delete namespace {ns}: {e}");
            }
        }
    }
    removed
}
