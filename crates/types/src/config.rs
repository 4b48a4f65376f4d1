use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "kubac.yaml";
pub const DEFAULT_GITOPS_PATH: &str = "clusters/my-cluster";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProfile {
    #[default]
    Local,
    Managed,
    Onprem,
}

impl fmt::Display for ClusterProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterProfile::Local => "local",
            ClusterProfile::Managed => "managed",
            ClusterProfile::Onprem => "onprem",
        };
        f.write_str(name)
    }
}

impl FromStr for ClusterProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ClusterProfile::Local),
            "managed" => Ok(ClusterProfile::Managed),
            "onprem" => Ok(ClusterProfile::Onprem),
            other => Err(ConfigError::InvalidValue {
                field: "clusterProfile",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Direct,
    Gitops,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Direct => f.write_str("direct"),
            InstallMode::Gitops => f.write_str("gitops"),
        }
    }
}

impl FromStr for InstallMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(InstallMode::Direct),
            "gitops" => Ok(InstallMode::Gitops),
            other => Err(ConfigError::InvalidValue {
                field: "mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Root of `kubac.yaml`. Every section carries `#[serde(default)]`, so a
/// trimmed file keeps the defaults for whatever it leaves out.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub cluster_profile: ClusterProfile,
    pub mode: InstallMode,
    pub gitops: GitOpsConfig,
    pub platform: PlatformConfig,
    pub policy: PolicyConfig,
    pub network_policy: NetworkPolicyConfig,
    pub autoscaling: AutoscalingConfig,
    pub demo: DemoConfig,
    pub verify: VerifyConfig,
    pub install: InstallConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GitOpsConfig {
    pub provider: String,
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub branch: String,
    pub path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformConfig {
    pub metrics_server: ComponentConfig,
    pub kube_state_metrics: ComponentConfig,
    pub prometheus_stack: ComponentConfig,
    pub ingress: IngressConfig,
    pub cert_manager: ComponentConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentConfig {
    pub enabled: bool,
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressConfig {
    pub enabled: bool,
    pub provider: String,
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub provider: String,
    pub version: String,
    pub pod_security_standard: String,
    pub custom_policies: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicyConfig {
    pub enabled: bool,
    pub default_deny: bool,
    pub system_namespaces: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoscalingConfig {
    pub hpa: HpaToggle,
    pub node_autoscaler: NodeAutoscalerConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HpaToggle {
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeAutoscalerConfig {
    pub enabled: bool,
    pub provider: String,
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoConfig {
    pub namespace: String,
    pub replicas: i32,
    pub resources: ResourcesSpec,
    pub hpa: HpaSpec,
    pub pdb: PdbSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourcesSpec {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceList {
    pub cpu: String,
    pub memory: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HpaSpec {
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(rename = "targetCPUUtilization")]
    pub target_cpu_utilization: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PdbSpec {
    pub min_available: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyConfig {
    pub timeout: String,
    pub parallel: bool,
    pub tests: Vec<String>,
    pub poll_interval: String,
    pub self_heal_timeout: String,
}

impl VerifyConfig {
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_interval("verify.pollInterval", &self.poll_interval)
    }

    pub fn self_heal_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.self_heal_timeout)
    }
}

/// Install-time knobs: where the manifest bundles live and how long a
/// component gets to become ready before the install aborts.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallConfig {
    pub bundles_dir: String,
    pub readiness_interval: String,
    pub readiness_timeout: String,
}

impl InstallConfig {
    pub fn readiness_interval(&self) -> Result<Duration, ConfigError> {
        parse_interval("install.readinessInterval", &self.readiness_interval)
    }

    pub fn readiness_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.readiness_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        default_config(ClusterProfile::default(), InstallMode::default())
    }
}

impl GitOpsConfig {
    /// The cluster path inside the repository, falling back to
    /// [`DEFAULT_GITOPS_PATH`] when left empty.
    pub fn cluster_path(&self) -> &str {
        if self.path.is_empty() {
            DEFAULT_GITOPS_PATH
        } else {
            &self.path
        }
    }
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        GitOpsConfig {
            provider: "flux".to_string(),
            repo_url: String::new(),
            branch: "main".to_string(),
            path: DEFAULT_GITOPS_PATH.to_string(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            metrics_server: component(true, "v0.7.0"),
            kube_state_metrics: component(true, "v2.10.1"),
            prometheus_stack: component(false, "v55.5.0"),
            ingress: IngressConfig {
                enabled: false,
                provider: "nginx".to_string(),
                version: "v1.9.5".to_string(),
            },
            cert_manager: component(false, "v1.13.3"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            enabled: true,
            provider: "kyverno".to_string(),
            version: "v1.11.4".to_string(),
            pod_security_standard: "restricted".to_string(),
            custom_policies: strings(&[
                "require-non-root-user",
                "require-ro-rootfs",
                "disallow-privileged",
            ]),
        }
    }
}

impl Default for NetworkPolicyConfig {
    fn default() -> Self {
        NetworkPolicyConfig {
            enabled: true,
            default_deny: true,
            system_namespaces: strings(&["kube-system", "kube-public", "kubac-system"]),
        }
    }
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        AutoscalingConfig {
            hpa: HpaToggle { enabled: true },
            node_autoscaler: NodeAutoscalerConfig {
                enabled: false,
                provider: "cluster-autoscaler".to_string(),
                version: "v1.29.0".to_string(),
            },
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            namespace: "kubac-demo".to_string(),
            replicas: 2,
            resources: ResourcesSpec {
                requests: ResourceList {
                    cpu: "100m".to_string(),
                    memory: "128Mi".to_string(),
                },
                limits: ResourceList {
                    cpu: "200m".to_string(),
                    memory: "256Mi".to_string(),
                },
            },
            hpa: HpaSpec::default(),
            pdb: PdbSpec::default(),
        }
    }
}

impl Default for HpaSpec {
    fn default() -> Self {
        HpaSpec {
            min_replicas: 2,
            max_replicas: 10,
            target_cpu_utilization: 50,
        }
    }
}

impl Default for PdbSpec {
    fn default() -> Self {
        PdbSpec { min_available: 1 }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            timeout: "300s".to_string(),
            parallel: true,
            tests: strings(&["pod-selfheal", "hpa-scale", "policy-deny", "network-deny"]),
            poll_interval: "5s".to_string(),
            self_heal_timeout: "60s".to_string(),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        InstallConfig {
            bundles_dir: "bundles".to_string(),
            readiness_interval: "5s".to_string(),
            readiness_timeout: "120s".to_string(),
        }
    }
}

/// Builds the opinionated default configuration for a profile and mode.
/// Pure: every call returns a fresh value.
pub fn default_config(profile: ClusterProfile, mode: InstallMode) -> Config {
    Config {
        cluster_profile: profile,
        mode,
        gitops: GitOpsConfig::default(),
        platform: PlatformConfig::default(),
        policy: PolicyConfig::default(),
        network_policy: NetworkPolicyConfig::default(),
        autoscaling: AutoscalingConfig::default(),
        demo: DemoConfig::default(),
        verify: VerifyConfig::default(),
        install: InstallConfig::default(),
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    // an empty document deserializes to unit, not to an empty mapping
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(&data)?)
}

pub fn write_config(path: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let data = serde_yaml::to_string(config)?;
    fs::write(path, data).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Parses `500ms`, `5s`, `2m` or `1h`. A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(amount)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(invalid()),
    };
    amount
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Like [`parse_duration`], but a poll interval has to be positive.
fn parse_interval(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let interval = parse_duration(value)?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(interval)
}

fn component(enabled: bool, version: &str) -> ComponentConfig {
    ComponentConfig {
        enabled,
        version: version.to_string(),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
