//! Preflight checks for `kubac doctor`.

use helpers::system::tools::kubectl_client_version;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, ListParams};
use kube::config::Kubeconfig;
use kube::Client;
use log::debug;
use types::{CheckReport, CheckResult, ProbeStatus};

/// Runs every check in order. Checks that need a client are skipped when
/// none could be built.
pub async fn run_checks() -> CheckReport {
    let mut checks = vec![check_kubectl()];

    match Client::try_default().await {
        Ok(client) => {
            checks.push(check_cluster_access(&client).await);
            checks.push(check_permissions(&client).await);
            checks.push(check_nodes(&client).await);
        }
        Err(e) => {
            debug!("cannot build kubernetes client: {e}");
            checks.push(CheckResult::new(
                "cluster-access",
                ProbeStatus::Fail,
                format!("Failed to create client: {e}"),
            ));
            for name in ["permissions", "nodes"] {
                checks.push(CheckResult::new(
                    name,
                    ProbeStatus::Skip,
                    "Skipped due to cluster access failure",
                ));
            }
        }
    }

    CheckReport { checks }
}

fn check_kubectl() -> CheckResult {
    match kubectl_client_version() {
        Ok(version) => CheckResult::new("kubectl", ProbeStatus::Pass, format!("kubectl {version}")),
        Err(e) => CheckResult::new(
            "kubectl",
            ProbeStatus::Fail,
            format!("kubectl not found or not executable: {e:#}"),
        ),
    }
}

async fn check_cluster_access(client: &Client) -> CheckResult {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if let Err(e) = namespaces.list(&ListParams::default().limit(1)).await {
        return CheckResult::new(
            "cluster-access",
            ProbeStatus::Fail,
            format!("Failed to connect to cluster: {e}"),
        );
    }

    // in-cluster credentials have no kubeconfig context
    match Kubeconfig::read().ok().and_then(|k| k.current_context) {
        Some(context) => CheckResult::new(
            "cluster-access",
            ProbeStatus::Pass,
            format!("Connected to context: {context}"),
        ),
        None => CheckResult::new(
            "cluster-access",
            ProbeStatus::Warn,
            "Connected but cannot determine context",
        ),
    }
}

async fn check_permissions(client: &Client) -> CheckResult {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.list(&ListParams::default()).await {
        Ok(_) => CheckResult::new(
            "permissions",
            ProbeStatus::Pass,
            "User has required cluster permissions",
        ),
        Err(e) => {
            debug!("listing namespaces failed: {e}");
            CheckResult::new(
                "permissions",
                ProbeStatus::Fail,
                "Insufficient permissions to list namespaces",
            )
        }
    }
}

async fn check_nodes(client: &Client) -> CheckResult {
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(list) => summarize_nodes(&list.items),
        Err(e) => CheckResult::new("nodes", ProbeStatus::Warn, format!("Cannot list nodes: {e}")),
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn summarize_nodes(nodes: &[Node]) -> CheckResult {
    let ready = nodes.iter().filter(|n| is_ready(n)).count();
    if ready == 0 {
        return CheckResult::new("nodes", ProbeStatus::Fail, "No ready nodes found");
    }
    CheckResult::new(
        "nodes",
        ProbeStatus::Pass,
        format!("{ready}/{} nodes ready", nodes.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};

    fn node(conditions: &[(&str, &str)]) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(t, s)| NodeCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn counts_ready_nodes() {
        let nodes = [
            node(&[("MemoryPressure", "False"), ("Ready", "True")]),
            node(&[("Ready", "False")]),
            node(&[("Ready", "True")]),
            Node::default(),
        ];

        let result = summarize_nodes(&nodes);

        assert_eq!(result.status, ProbeStatus::Pass);
        assert_eq!(result.message, "2/4 nodes ready");
    }

    #[test]
    fn no_ready_nodes_fails() {
        let result = summarize_nodes(&[node(&[("Ready", "Unknown")])]);
        assert_eq!(result.status, ProbeStatus::Fail);

        assert_eq!(summarize_nodes(&[]).status, ProbeStatus::Fail);
    }
}
