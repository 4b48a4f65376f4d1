//! The verification suite run by `kubac verify`.
//!
//! Each probe is independent: a failing probe never stops the ones after it,
//! and every requested name produces exactly one result.

use chrono::Utc;
use helpers::{poll_immediate, ClusterError, ClusterState};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, SecurityContext};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use log::{info, warn};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use types::config::HpaSpec;
use types::{Config, ConfigError, ProbeResult, ProbeStatus, VerificationReport};

pub const DEMO_APP: &str = "demo";
pub const DEMO_SELECTOR: &str = "app=demo";
pub const POLICY_TEST_POD: &str = "kubac-privileged-test";

/// The closed set of probes kubac knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    PodSelfHeal,
    HpaScale,
    PolicyDeny,
    NetworkDeny,
}

impl Probe {
    pub const ALL: [Probe; 4] = [
        Probe::PodSelfHeal,
        Probe::HpaScale,
        Probe::PolicyDeny,
        Probe::NetworkDeny,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Probe::PodSelfHeal => "pod-selfheal",
            Probe::HpaScale => "hpa-scale",
            Probe::PolicyDeny => "policy-deny",
            Probe::NetworkDeny => "network-deny",
        }
    }

    pub fn from_name(name: &str) -> Option<Probe> {
        Probe::ALL.into_iter().find(|p| p.name() == name)
    }
}

struct Verdict {
    status: ProbeStatus,
    message: String,
}

impl Verdict {
    fn pass(message: impl Into<String>) -> Self {
        Verdict {
            status: ProbeStatus::Pass,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Verdict {
            status: ProbeStatus::Fail,
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Verdict {
            status: ProbeStatus::Warn,
            message: message.into(),
        }
    }

    fn skip(message: impl Into<String>) -> Self {
        Verdict {
            status: ProbeStatus::Skip,
            message: message.into(),
        }
    }

    /// Missing objects mean the subject is not deployed yet; anything else
    /// is a real failure.
    fn from_lookup_error(subject: &str, err: &ClusterError) -> Self {
        if err.is_not_found() {
            Verdict::skip(format!("{subject} not deployed: {err}"))
        } else {
            Verdict::fail(format!("Failed to read {subject}: {err}"))
        }
    }
}

pub struct Verifier<'a, C> {
    cluster: &'a C,
    namespace: String,
    hpa: HpaSpec,
    poll_interval: Duration,
    self_heal_timeout: Duration,
}

impl<'a, C: ClusterState> Verifier<'a, C> {
    pub fn new(cluster: &'a C, config: &Config) -> Result<Self, ConfigError> {
        Ok(Verifier {
            cluster,
            namespace: config.demo.namespace.clone(),
            hpa: config.demo.hpa.clone(),
            poll_interval: config.verify.poll_interval()?,
            self_heal_timeout: config.verify.self_heal_timeout()?,
        })
    }

    /// Runs every requested probe in order and collects the report.
    pub async fn run_all(&self, tests: &[String]) -> VerificationReport {
        let started = Utc::now();
        let mut results = Vec::with_capacity(tests.len());
        for name in tests {
            results.push(self.run_probe(name).await);
        }
        VerificationReport::new(results, started)
    }

    pub async fn run_probe(&self, name: &str) -> ProbeResult {
        let start = Instant::now();
        info!("running probe {name}");

        let verdict = match Probe::from_name(name) {
            Some(Probe::PodSelfHeal) => self.pod_selfheal().await,
            Some(Probe::HpaScale) => self.hpa_scale().await,
            Some(Probe::PolicyDeny) => self.policy_deny().await,
            Some(Probe::NetworkDeny) => self.network_deny().await,
            None => Verdict::skip("Unknown test"),
        };

        info!("probe {name} finished: {}", verdict.status);
        ProbeResult {
            name: name.to_string(),
            status: verdict.status,
            message: verdict.message,
            duration: start.elapsed(),
            timestamp: Utc::now(),
        }
    }

    /// Deletes one demo pod and waits for the deployment to report at least
    /// as many ready replicas as before.
    async fn pod_selfheal(&self) -> Verdict {
        let cluster = self.cluster;
        let namespace = self.namespace.as_str();

        let deployment: Deployment = match cluster.get(namespace, DEMO_APP).await {
            Ok(d) => d,
            Err(e) => return Verdict::from_lookup_error("Demo app", &e),
        };
        let baseline = ready_replicas(&deployment);

        let pods: Vec<Pod> = match cluster.list(namespace, Some(DEMO_SELECTOR)).await {
            Ok(pods) => pods,
            Err(e) => return Verdict::fail(format!("No demo pods found: {e}")),
        };
        let Some(pod) = pods.first() else {
            return Verdict::fail("No demo pods found");
        };
        let pod_name = pod.name_any();

        if let Err(e) = cluster.delete::<Pod>(namespace, &pod_name).await {
            return Verdict::fail(format!("Failed to delete pod: {e}"));
        }
        info!("deleted pod {pod_name}, waiting for {baseline} ready replicas");

        let recovered = poll_immediate(self.poll_interval, self.self_heal_timeout, move || async move {
            cluster
                .get::<Deployment>(namespace, DEMO_APP)
                .await
                .map(|d| ready_replicas(&d) >= baseline)
        })
        .await;

        match recovered {
            Ok(()) => Verdict::pass(format!("Pod {pod_name} was replaced successfully")),
            Err(e) => {
                warn!("pod {pod_name} not replaced: {e}");
                Verdict::fail("Pod was not replaced within timeout")
            }
        }
    }

    /// Compares the live autoscaler bounds with the configured ones.
    async fn hpa_scale(&self) -> Verdict {
        let hpa: HorizontalPodAutoscaler = match self.cluster.get(&self.namespace, DEMO_APP).await {
            Ok(hpa) => hpa,
            Err(e) => return Verdict::from_lookup_error("HPA", &e),
        };

        let spec = hpa.spec.unwrap_or_default();
        let min = spec.min_replicas;
        if min != Some(self.hpa.min_replicas) {
            return Verdict::fail(format!(
                "HPA minReplicas mismatch (expected {}, found {})",
                self.hpa.min_replicas,
                min.map_or_else(|| "unset".to_string(), |m| m.to_string())
            ));
        }
        if spec.max_replicas != self.hpa.max_replicas {
            return Verdict::fail(format!(
                "HPA maxReplicas mismatch (expected {}, found {})",
                self.hpa.max_replicas, spec.max_replicas
            ));
        }

        let current = hpa
            .status
            .and_then(|s| s.current_replicas)
            .unwrap_or_default();
        Verdict::pass(format!(
            "HPA configured correctly (current replicas: {current}, min: {}, max: {})",
            self.hpa.min_replicas, spec.max_replicas
        ))
    }

    /// Tries to create a privileged pod; admission must reject it.
    async fn policy_deny(&self) -> Verdict {
        let cluster = self.cluster;
        let namespace = self.namespace.as_str();
        let pod = privileged_pod(namespace);

        match cluster.create(namespace, &pod).await {
            Err(ClusterError::Denied(reason)) => {
                info!("privileged pod rejected: {reason}");
                Verdict::pass("Privileged pod was correctly denied by policy")
            }
            Ok(_) => {
                self.remove_test_pod().await;
                Verdict::fail("Privileged pod was not denied by policy")
            }
            Err(ClusterError::AlreadyExists(_)) => {
                self.remove_test_pod().await;
                Verdict::fail("A privileged test pod from an earlier run is still present")
            }
            Err(e) if e.is_not_found() => {
                Verdict::skip(format!("Demo namespace {namespace} not found: {e}"))
            }
            Err(e) => Verdict::fail(format!("Failed to create privileged test pod: {e}")),
        }
    }

    async fn remove_test_pod(&self) {
        if let Err(e) = self
            .cluster
            .delete::<Pod>(&self.namespace, POLICY_TEST_POD)
            .await
        {
            warn!("failed to clean up {POLICY_TEST_POD}: {e}");
        }
    }

    /// Looks for network policies in the demo namespace, preferring one that
    /// denies all traffic by default.
    async fn network_deny(&self) -> Verdict {
        let policies: Vec<NetworkPolicy> = match self.cluster.list(&self.namespace, None).await {
            Ok(p) => p,
            Err(e) if e.is_not_found() => {
                return Verdict::skip(format!("Cannot list network policies: {e}"))
            }
            Err(e) => return Verdict::fail(format!("Cannot list network policies: {e}")),
        };

        if policies.is_empty() {
            return Verdict::fail("No network policies found");
        }

        if !policies.iter().any(is_default_deny) {
            return Verdict::warn(format!(
                "Found {} network policies but no default deny",
                policies.len()
            ));
        }

        Verdict::pass(format!(
            "Network policies configured ({} policies including default deny)",
            policies.len()
        ))
    }
}

fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

fn is_default_deny(policy: &NetworkPolicy) -> bool {
    policy.spec.as_ref().map_or(true, |spec| {
        spec.ingress.as_ref().map_or(true, |r| r.is_empty())
            && spec.egress.as_ref().map_or(true, |r| r.is_empty())
    })
}

fn privileged_pod(namespace: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(POLICY_TEST_POD.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "kubac".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "test".to_string(),
                image: Some("nginx:latest".to_string()),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}
