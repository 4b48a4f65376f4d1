//! The demo workload used to exercise autoscaling, self-healing and policy.

use crate::verify::{DEMO_APP, DEMO_SELECTOR};
use chrono::{DateTime, Utc};
use helpers::{ClusterError, ClusterState};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::ResourceExt;
use log::info;
use serde_json::json;
use thiserror::Error;
use types::config::{parse_duration, DemoConfig};
use types::ConfigError;

const DEMO_IMAGE: &str = "nginxinc/nginx-unprivileged:1.25-alpine";
const LOAD_IMAGE: &str = "williamyeh/hey:latest";
const DEMO_PORT: u16 = 8080;

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("failed to render demo manifests: {0}")]
    Render(#[from] serde_json::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("no demo pods found in namespace {0}")]
    NoPods(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Deployment, Service, HorizontalPodAutoscaler and PodDisruptionBudget for
/// the demo app, sized from the configuration.
pub fn demo_manifests(demo: &DemoConfig) -> Result<Vec<DynamicObject>, serde_json::Error> {
    let ns = demo.namespace.as_str();
    let labels = json!({"app": DEMO_APP});
    let meta = json!({"name": DEMO_APP, "namespace": ns, "labels": labels});

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": meta,
        "spec": {
            "replicas": demo.replicas,
            "selector": {"matchLabels": labels},
            "template": {
                "metadata": {"labels": labels},
                "spec": {
                    "securityContext": {
                        "runAsNonRoot": true,
                        "runAsUser": 101,
                        "seccompProfile": {"type": "RuntimeDefault"},
                    },
                    "containers": [{
                        "name": DEMO_APP,
                        "image": DEMO_IMAGE,
                        "ports": [{"containerPort": DEMO_PORT, "name": "http"}],
                        "resources": {
                            "requests": {
                                "cpu": demo.resources.requests.cpu,
                                "memory": demo.resources.requests.memory,
                            },
                            "limits": {
                                "cpu": demo.resources.limits.cpu,
                                "memory": demo.resources.limits.memory,
                            },
                        },
                        "readinessProbe": {"httpGet": {"path": "/", "port": "http"}},
                        "securityContext": {
                            "allowPrivilegeEscalation": false,
                            "readOnlyRootFilesystem": true,
                            "capabilities": {"drop": ["ALL"]},
                        },
                        "volumeMounts": [
                            {"name": "tmp", "mountPath": "/tmp"},
                            {"name": "cache", "mountPath": "/var/cache/nginx"},
                        ],
                    }],
                    "volumes": [
                        {"name": "tmp", "emptyDir": {}},
                        {"name": "cache", "emptyDir": {}},
                    ],
                },
            },
        },
    });

    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": meta,
        "spec": {
            "selector": labels,
            "ports": [{"name": "http", "port": 80, "targetPort": "http"}],
        },
    });

    let hpa = json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": meta,
        "spec": {
            "scaleTargetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": DEMO_APP},
            "minReplicas": demo.hpa.min_replicas,
            "maxReplicas": demo.hpa.max_replicas,
            "metrics": [{
                "type": "Resource",
                "resource": {
                    "name": "cpu",
                    "target": {
                        "type": "Utilization",
                        "averageUtilization": demo.hpa.target_cpu_utilization,
                    },
                },
            }],
        },
    });

    let pdb = json!({
        "apiVersion": "policy/v1",
        "kind": "PodDisruptionBudget",
        "metadata": meta,
        "spec": {
            "minAvailable": demo.pdb.min_available,
            "selector": {"matchLabels": labels},
        },
    });

    [deployment, service, hpa, pdb]
        .into_iter()
        .map(serde_json::from_value)
        .collect()
}

/// A one-shot Job that drives HTTP load against the demo service.
pub fn load_job(
    demo: &DemoConfig,
    duration: &str,
    requests: u32,
    now: DateTime<Utc>,
) -> Result<DynamicObject, DemoError> {
    parse_duration(duration)?;
    let target = format!("http://{DEMO_APP}.{}.svc.cluster.local", demo.namespace);

    let job = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": format!("demo-load-{}", now.timestamp()),
            "namespace": demo.namespace,
            "labels": {"app": "demo-load"},
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": 300,
            "template": {
                "metadata": {"labels": {"app": "demo-load"}},
                "spec": {
                    "restartPolicy": "Never",
                    "securityContext": {"runAsNonRoot": true, "runAsUser": 65534},
                    "containers": [{
                        "name": "load",
                        "image": LOAD_IMAGE,
                        "args": ["-z", duration, "-n", requests.to_string(), target],
                        "securityContext": {
                            "allowPrivilegeEscalation": false,
                            "readOnlyRootFilesystem": true,
                            "capabilities": {"drop": ["ALL"]},
                        },
                    }],
                },
            },
        },
    });
    Ok(serde_json::from_value(job)?)
}

pub async fn deploy<C: ClusterState>(cluster: &C, demo: &DemoConfig) -> Result<(), DemoError> {
    println!("\n→ Creating namespace {}...", demo.namespace);
    cluster.ensure_namespace(&demo.namespace).await?;

    println!("\n→ Deploying demo application...");
    for obj in demo_manifests(demo)? {
        cluster.apply(&obj).await?;
    }
    println!("  ✓ Demo application deployed");
    Ok(())
}

/// Starts a load Job and returns its name.
pub async fn load<C: ClusterState>(
    cluster: &C,
    demo: &DemoConfig,
    duration: &str,
    requests: u32,
) -> Result<String, DemoError> {
    let job = load_job(demo, duration, requests, Utc::now())?;
    let name = job.name_any();

    println!("\n→ Starting load test job {name}...");
    cluster.apply(&job).await?;
    println!("  ✓ Load test job started");
    println!("  Monitor HPA with: kubectl get hpa -n {} -w", demo.namespace);
    Ok(name)
}

/// Deletes the first demo pod and returns its name.
pub async fn chaos<C: ClusterState>(cluster: &C, demo: &DemoConfig) -> Result<String, DemoError> {
    println!("\n→ Deleting a demo pod to test self-healing...");
    let pods: Vec<Pod> = cluster.list(&demo.namespace, Some(DEMO_SELECTOR)).await?;
    let Some(pod) = pods.first() else {
        return Err(DemoError::NoPods(demo.namespace.clone()));
    };
    let name = pod.name_any();

    println!("  Deleting pod {name}...");
    cluster.delete::<Pod>(&demo.namespace, &name).await?;
    println!("  ✓ Pod deleted, Kubernetes should recreate it automatically");
    println!("  Monitor pods with: kubectl get pods -n {} -w", demo.namespace);
    Ok(name)
}

/// Removes the demo namespace. Returns `false` when it was already gone.
pub async fn cleanup<C: ClusterState>(cluster: &C, demo: &DemoConfig) -> Result<bool, DemoError> {
    println!("\n→ Deleting namespace {}...", demo.namespace);
    match cluster.delete_namespace(&demo.namespace).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            info!("namespace {} does not exist", demo.namespace);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
