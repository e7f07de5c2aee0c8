//! The persisted `VulnerabilityReport` custom resource and its findings
//! payload.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One report per workload container. The object name is
/// `lower(kind)-name-container` so repeated writes collide instead of
/// duplicating.
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vulnwatch.dev",
    version = "v1alpha1",
    kind = "VulnerabilityReport",
    plural = "vulnerabilityreports",
    shortname = "vulns",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityReportSpec {
    pub report: VulnerabilityScanResult,
}

/// Structured findings produced by the scanner for a single image.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityScanResult {
    pub update_timestamp: DateTime<Utc>,
    pub scanner: ScannerInfo,
    pub registry: Registry,
    pub artifact: Artifact,
    pub summary: VulnerabilitySummary,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScannerInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub server: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilitySummary {
    pub critical_count: u32,
    pub high_count: u32,
    pub medium_count: u32,
    pub low_count: u32,
    pub unknown_count: u32,
}

impl VulnerabilitySummary {
    pub fn from_vulnerabilities<'a>(
        vulnerabilities: impl IntoIterator<Item = &'a Vulnerability>,
    ) -> Self {
        let mut summary = Self::default();
        for vulnerability in vulnerabilities {
            summary.record(vulnerability.severity);
        }
        summary
    }

    pub fn record(&mut self, severity: Severity) {
        let counter = match severity {
            Severity::Critical => &mut self.critical_count,
            Severity::High => &mut self.high_count,
            Severity::Medium => &mut self.medium_count,
            Severity::Low => &mut self.low_count,
            Severity::Unknown => &mut self.unknown_count,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u32 {
        self.critical_count
            + self.high_count
            + self.medium_count
            + self.low_count
            + self.unknown_count
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    #[serde(rename = "vulnerabilityID")]
    pub vulnerability_id: String,
    pub resource: String,
    pub installed_version: String,
    #[serde(default)]
    pub fixed_version: String,
    pub severity: Severity,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_severity() {
        let vulnerabilities = [
            Severity::Critical,
            Severity::High,
            Severity::High,
            Severity::Unknown,
        ]
        .into_iter()
        .map(|severity| Vulnerability {
            severity,
            ..Default::default()
        })
        .collect::<Vec<_>>();

        let summary = VulnerabilitySummary::from_vulnerabilities(&vulnerabilities);
        assert_eq!(summary.critical_count, 1);
        assert_eq!(summary.high_count, 2);
        assert_eq!(summary.unknown_count, 1);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn unrecognised_severity_maps_to_unknown() {
        let severity: Severity = serde_json::from_str("\"NEGLIGIBLE\"").unwrap();
        assert_eq!(severity, Severity::Unknown);
        let severity: Severity = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(severity, Severity::High);
    }
}
