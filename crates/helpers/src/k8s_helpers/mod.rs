pub mod kubernetes;
pub mod manifests;
