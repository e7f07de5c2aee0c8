//! Trivy-backed scanner: scan jobs run `trivy image` per container and print
//! a JSON report to stdout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::io::AsyncReadExt;
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, EnvVar, ResourceRequirements, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Deserialize;
use tracing::debug;
use vulnwatch_model::{
    Artifact, Registry, ScannerInfo, Severity, Vulnerability,
    VulnerabilityScanResult, VulnerabilitySummary,
};

use super::VulnerabilityScanner;
use crate::cluster::LogStream;
use crate::error::{Result, ScanError};

pub const DEFAULT_TRIVY_IMAGE: &str = "aquasec/trivy:0.16.0";
const DEFAULT_REGISTRY: &str = "index.docker.io";

#[derive(Clone, Debug)]
pub struct TrivyScanner {
    image: String,
}

impl Default for TrivyScanner {
    fn default() -> Self {
        Self::new(DEFAULT_TRIVY_IMAGE)
    }
}

impl TrivyScanner {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    fn version(&self) -> String {
        split_reference(&self.image)
            .1
            .unwrap_or_else(|| "latest".to_string())
    }

    fn container_for(&self, status: &ContainerStatus) -> Container {
        let quantities = |cpu: &str, memory: &str| {
            BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ])
        };

        Container {
            name: status.name.clone(),
            image: Some(self.image.clone()),
            image_pull_policy: Some("IfNotPresent".into()),
            command: Some(vec!["trivy".into()]),
            args: Some(vec![
                "--quiet".into(),
                "image".into(),
                "--no-progress".into(),
                "--format".into(),
                "json".into(),
                status.image.clone(),
            ]),
            env: Some(vec![EnvVar {
                name: "TRIVY_CACHE_DIR".into(),
                value: Some("/tmp/trivy/.cache".into()),
                ..EnvVar::default()
            }]),
            resources: Some(ResourceRequirements {
                requests: Some(quantities("100m", "100M")),
                limits: Some(quantities("500m", "500M")),
                ..ResourceRequirements::default()
            }),
            security_context: Some(SecurityContext {
                privileged: Some(false),
                allow_privilege_escalation: Some(false),
                ..SecurityContext::default()
            }),
            ..Container::default()
        }
    }
}

#[async_trait]
impl VulnerabilityScanner for TrivyScanner {
    fn scan_containers(&self, statuses: &[ContainerStatus]) -> Vec<Container> {
        statuses
            .iter()
            .map(|status| self.container_for(status))
            .collect()
    }

    async fn parse_report(
        &self,
        image_digest: &str,
        mut logs: LogStream,
    ) -> Result<VulnerabilityScanResult> {
        let mut raw = String::new();
        logs.read_to_string(&mut raw).await?;
        let output = parse_output(&raw)?;

        let (artifact_name, results) = match output {
            TrivyOutput::Report(report) => (report.artifact_name, report.results),
            TrivyOutput::Legacy(results) => {
                let name = results.first().map(|result| {
                    result
                        .target
                        .split(" (")
                        .next()
                        .unwrap_or_default()
                        .to_string()
                });
                (name, results)
            }
        };

        let vulnerabilities: Vec<Vulnerability> = results
            .into_iter()
            .flat_map(|result| result.vulnerabilities.unwrap_or_default())
            .map(Vulnerability::from)
            .collect();
        debug!(
            digest = image_digest,
            count = vulnerabilities.len(),
            "parsed trivy report"
        );

        let (server, repository, tag) =
            artifact_parts(artifact_name.as_deref().unwrap_or_default());

        Ok(VulnerabilityScanResult {
            update_timestamp: Utc::now(),
            scanner: ScannerInfo {
                name: "Trivy".into(),
                vendor: "Aqua Security".into(),
                version: self.version(),
            },
            registry: Registry { server },
            artifact: Artifact {
                repository,
                digest: Some(image_digest.to_string()),
                tag,
                mime_type: None,
            },
            summary: VulnerabilitySummary::from_vulnerabilities(&vulnerabilities),
            vulnerabilities,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrivyOutput {
    Report(TrivyReport),
    Legacy(Vec<TrivyResult>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    artifact_name: Option<String>,
    #[serde(default)]
    results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    target: String,
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    pkg_name: String,
    #[serde(default)]
    installed_version: String,
    #[serde(default)]
    fixed_version: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    severity: Severity,
    #[serde(default, rename = "PrimaryURL")]
    primary_url: Option<String>,
    #[serde(default)]
    references: Vec<String>,
}

impl From<TrivyVulnerability> for Vulnerability {
    fn from(value: TrivyVulnerability) -> Self {
        Vulnerability {
            vulnerability_id: value.vulnerability_id,
            resource: value.pkg_name,
            installed_version: value.installed_version,
            fixed_version: value.fixed_version,
            severity: value.severity,
            title: value.title,
            primary_link: value.primary_url,
            links: value.references,
        }
    }
}

fn parse_output(raw: &str) -> Result<TrivyOutput> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::Parse("scan container produced no output".into()));
    }
    // An image without OS packages is reported as a bare `null`.
    if trimmed == "null" {
        return Ok(TrivyOutput::Legacy(Vec::new()));
    }
    serde_json::from_str(trimmed).map_err(|err| ScanError::Parse(err.to_string()))
}

/// Splits `repo[:tag]`, leaving registry ports alone.
fn split_reference(reference: &str) -> (String, Option<String>) {
    let reference = reference.split('@').next().unwrap_or(reference);
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => {
            (repo.to_string(), Some(tag.to_string()))
        }
        _ => (reference.to_string(), None),
    }
}

fn artifact_parts(reference: &str) -> (String, String, Option<String>) {
    let (repository, tag) = split_reference(reference);
    match repository.split_once('/') {
        Some((host, rest))
            if host.contains('.') || host.contains(':') || host == "localhost" =>
        {
            (host.to_string(), rest.to_string(), tag)
        }
        _ => (DEFAULT_REGISTRY.to_string(), repository, tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(raw: &str) -> LogStream {
        Box::pin(futures::io::Cursor::new(raw.as_bytes().to_vec()))
    }

    const LEGACY: &str = r#"[
      {
        "Target": "nginx:1.16 (debian 10.3)",
        "Vulnerabilities": [
          {
            "VulnerabilityID": "CVE-2020-1967",
            "PkgName": "libssl1.1",
            "InstalledVersion": "1.1.1d-0+deb10u2",
            "FixedVersion": "1.1.1d-0+deb10u3",
            "Title": "openssl: Segmentation fault in SSL_check_chain",
            "Severity": "HIGH",
            "References": ["https://example.test/CVE-2020-1967"]
          },
          {
            "VulnerabilityID": "CVE-2019-3843",
            "PkgName": "libsystemd0",
            "InstalledVersion": "241-7~deb10u3",
            "Severity": "LOW"
          }
        ]
      }
    ]"#;

    #[tokio::test]
    async fn parses_legacy_array_output() {
        let scanner = TrivyScanner::default();
        let result = scanner.parse_report("aaa", stream(LEGACY)).await.unwrap();

        assert_eq!(result.vulnerabilities.len(), 2);
        assert_eq!(result.summary.high_count, 1);
        assert_eq!(result.summary.low_count, 1);
        assert_eq!(result.artifact.repository, "nginx");
        assert_eq!(result.artifact.tag.as_deref(), Some("1.16"));
        assert_eq!(result.artifact.digest.as_deref(), Some("aaa"));
        assert_eq!(result.registry.server, DEFAULT_REGISTRY);
        assert_eq!(result.scanner.version, "0.16.0");
    }

    #[tokio::test]
    async fn parses_schema_v2_output() {
        let raw = r#"{
          "SchemaVersion": 2,
          "ArtifactName": "registry.example.com:5000/team/api:2.1",
          "Results": [
            {"Target": "app", "Vulnerabilities": [
              {"VulnerabilityID": "CVE-1", "PkgName": "lib", "Severity": "CRITICAL"}
            ]},
            {"Target": "empty"}
          ]
        }"#;
        let result = TrivyScanner::default()
            .parse_report("bbb", stream(raw))
            .await
            .unwrap();

        assert_eq!(result.summary.critical_count, 1);
        assert_eq!(result.registry.server, "registry.example.com:5000");
        assert_eq!(result.artifact.repository, "team/api");
        assert_eq!(result.artifact.tag.as_deref(), Some("2.1"));
    }

    #[tokio::test]
    async fn empty_or_garbage_output_is_a_parse_error() {
        let scanner = TrivyScanner::default();
        assert!(matches!(
            scanner.parse_report("aaa", stream("   ")).await,
            Err(ScanError::Parse(_))
        ));
        assert!(matches!(
            scanner.parse_report("aaa", stream("FATAL: no such image")).await,
            Err(ScanError::Parse(_))
        ));
    }

    #[test]
    fn scan_container_targets_status_image() {
        let status = ContainerStatus {
            name: "web".into(),
            image: "nginx:1.16".into(),
            ..Default::default()
        };
        let containers = TrivyScanner::default().scan_containers(&[status]);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "web");
        assert_eq!(
            containers[0].args.as_ref().and_then(|args| args.last()).map(String::as_str),
            Some("nginx:1.16")
        );
    }
}
