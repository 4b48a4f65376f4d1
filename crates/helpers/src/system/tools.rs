use anyhow::{bail, Context, Result};
use log::debug;
use regex::Regex;
use std::process::Command;

/// Runs `kubectl version --client` and returns the client version, e.g. `v1.29.0`.
pub fn kubectl_client_version() -> Result<String> {
    let output = Command::new("kubectl")
        .args(["version", "--client"])
        .output()
        .context("kubectl not found or not executable")?;

    if !output.status.success() {
        bail!(
            "kubectl version exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("kubectl version output: {}", stdout.trim());
    parse_client_version(&stdout)
        .with_context(|| format!("unrecognised kubectl version output: {}", stdout.trim()))
}

/// Extracts the client version from either the plain or the JSON form of
/// `kubectl version --client`.
pub fn parse_client_version(output: &str) -> Option<String> {
    let re = Regex::new(r#"(?:Client Version:\s*|"?[gG]itVersion"?:\s*")(v[0-9][^\s",]*)"#).ok()?;
    re.captures(output).map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_output() {
        let out = "Client Version: v1.29.2\nKustomize Version: v5.0.4-0.20230601165947-6ce0bf390ce3\n";
        assert_eq!(parse_client_version(out).as_deref(), Some("v1.29.2"));
    }

    #[test]
    fn parses_legacy_and_json_output() {
        let out = r#"Client Version: version.Info{Major:"1", Minor:"26", GitVersion:"v1.26.1"}"#;
        assert_eq!(parse_client_version(out).as_deref(), Some("v1.26.1"));

        let json = r#"{"clientVersion": {"major": "1", "gitVersion": "v1.26.1", "platform": "linux/amd64"}}"#;
        assert_eq!(parse_client_version(json).as_deref(), Some("v1.26.1"));
    }

    #[test]
    fn rejects_unrelated_output() {
        assert_eq!(parse_client_version("command not found"), None);
    }
}
