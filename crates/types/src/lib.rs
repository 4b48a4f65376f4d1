//! Shared data for kubac: the `kubac.yaml` configuration model and the
//! verification/preflight report types.

pub mod config;
pub mod errors;
pub mod report;

pub use config::{default_config, load_config, write_config, ClusterProfile, Config, InstallMode};
pub use errors::{ConfigError, ReportError};
pub use report::{CheckReport, CheckResult, ProbeResult, ProbeStatus, Summary, VerificationReport};
