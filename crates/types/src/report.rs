use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::errors::ReportError;

/// Verdict of a single probe or preflight check.
///
/// `Warn` and `Skip` are deliberately distinct from `Fail`: neither of them
/// makes a run unsuccessful.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

impl ProbeStatus {
    fn marker(self) -> &'static str {
        match self {
            ProbeStatus::Pass => "✓ PASS",
            ProbeStatus::Fail => "✗ FAIL",
            ProbeStatus::Warn => "⚠ WARN",
            ProbeStatus::Skip => "- SKIP",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeStatus::Pass => "PASS",
            ProbeStatus::Fail => "FAIL",
            ProbeStatus::Warn => "WARN",
            ProbeStatus::Skip => "SKIP",
        };
        f.write_str(name)
    }
}

#[serde_as]
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub message: String,
    /// elapsed seconds
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = ProbeStatus>) -> Self {
        let mut summary = Summary::default();
        for status in statuses {
            summary.total += 1;
            match status {
                ProbeStatus::Pass => summary.passed += 1,
                ProbeStatus::Fail => summary.failed += 1,
                ProbeStatus::Warn | ProbeStatus::Skip => {}
            }
        }
        summary
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct VerificationReport {
    pub tests: Vec<ProbeResult>,
    pub summary: Summary,
    pub timestamp: DateTime<Utc>,
}

impl VerificationReport {
    /// Results keep their order; the summary is derived from them.
    pub fn new(tests: Vec<ProbeResult>, timestamp: DateTime<Utc>) -> Self {
        let summary = Summary::from_statuses(tests.iter().map(|t| t.status));
        VerificationReport {
            tests,
            summary,
            timestamp,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_report(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        let data = self.to_json()?;
        fs::write(path, data).map_err(|source| ReportError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn print_summary(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "\nVerification Results:")?;
        writeln!(w, "=====================")?;

        for test in &self.tests {
            writeln!(w, "\n{:<20} {}", format!("{}:", test.name), test.status.marker())?;
            writeln!(w, "  {}", test.message)?;
            writeln!(w, "  Duration: {:.2?}", test.duration)?;
        }

        writeln!(w, "\n=====================")?;
        writeln!(w, "Total:  {}", self.summary.total)?;
        writeln!(w, "Passed: {}", self.summary.passed)?;
        writeln!(w, "Failed: {}", self.summary.failed)?;

        if self.all_passed() {
            writeln!(w, "\n✓ All tests passed!")
        } else {
            writeln!(w, "\n✗ Some tests failed")
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub status: ProbeStatus,
    pub message: String,
}

impl CheckResult {
    pub fn new(name: &str, status: ProbeStatus, message: impl Into<String>) -> Self {
        CheckResult {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }
}

/// Preflight check results printed by `kubac doctor`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CheckReport {
    pub checks: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != ProbeStatus::Fail)
    }

    pub fn print_text(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "\nPreflight Checks:")?;
        writeln!(w, "-----------------")?;
        for check in &self.checks {
            writeln!(w, "{:<20} {}", format!("{}:", check.name), check.status.marker())?;
            if !check.message.is_empty() {
                writeln!(w, "  {}", check.message)?;
            }
        }
        Ok(())
    }

    pub fn print_json(&self, w: &mut impl Write) -> Result<(), ReportError> {
        serde_json::to_writer_pretty(&mut *w, self)?;
        writeln!(w).map_err(|source| ReportError::Write {
            path: "<output>".to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: ProbeStatus) -> ProbeResult {
        ProbeResult {
            name: name.to_string(),
            status,
            message: format!("{name} finished"),
            duration: Duration::from_millis(1500),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_report_has_zero_totals_and_passes() {
        let report = VerificationReport::new(Vec::new(), Utc::now());
        assert_eq!(report.summary, Summary::default());
        assert!(report.all_passed());
    }

    #[test]
    fn summary_counts_every_status() {
        let report = VerificationReport::new(
            vec![
                result("a", ProbeStatus::Pass),
                result("b", ProbeStatus::Fail),
                result("c", ProbeStatus::Warn),
                result("d", ProbeStatus::Skip),
                result("e", ProbeStatus::Pass),
            ],
            Utc::now(),
        );

        assert_eq!(report.summary.total, report.tests.len());
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.all_passed());
    }

    #[test]
    fn warn_and_skip_do_not_fail_the_run() {
        let report = VerificationReport::new(
            vec![result("a", ProbeStatus::Warn), result("b", ProbeStatus::Skip)],
            Utc::now(),
        );
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.passed, 0);
        assert!(report.all_passed());
    }

    #[test]
    fn written_report_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = VerificationReport::new(
            vec![result("pod-selfheal", ProbeStatus::Pass), result("x", ProbeStatus::Skip)],
            Utc::now(),
        );

        report.write_report(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["tests"][0]["status"], "PASS");
        assert_eq!(value["tests"][0]["duration"], 1.5);
        assert_eq!(value["tests"][1]["status"], "SKIP");
        assert_eq!(value["summary"]["total"], 2);
        assert!(value["timestamp"].is_string());

        let back: VerificationReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.tests.len(), 2);
    }

    #[test]
    fn summary_text_lists_each_probe() {
        let report = VerificationReport::new(
            vec![result("policy-deny", ProbeStatus::Fail)],
            Utc::now(),
        );
        let mut out = Vec::new();
        report.print_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("policy-deny:"));
        assert!(text.contains("✗ FAIL"));
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("Some tests failed"));
    }

    #[test]
    fn check_report_fails_only_on_fail() {
        let mut report = CheckReport {
            checks: vec![
                CheckResult::new("kubectl", ProbeStatus::Pass, "v1.29.0"),
                CheckResult::new("nodes", ProbeStatus::Warn, "cannot list nodes"),
            ],
        };
        assert!(report.all_passed());

        report
            .checks
            .push(CheckResult::new("cluster-access", ProbeStatus::Fail, "refused"));
        assert!(!report.all_passed());

        let mut out = Vec::new();
        report.print_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("kubectl:"));
        assert!(text.contains("refused"));

        let mut json = Vec::new();
        report.print_json(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["checks"][2]["status"], "FAIL");
    }
}
