pub mod k8s_helpers;
pub mod poll;
pub mod system;

pub use k8s_helpers::kubernetes::{ClusterError, ClusterState, KubeCluster, NamespacedResource};
pub use poll::{poll_immediate, PollTimeout};
