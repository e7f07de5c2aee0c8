//! Scanner capability: what a scan job runs and how its output becomes
//! findings.

pub mod trivy;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerStatus};
use vulnwatch_model::VulnerabilityScanResult;

use crate::cluster::LogStream;
use crate::error::Result;

pub use trivy::TrivyScanner;

#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    /// One scan container per workload container, named after it so the
    /// harvested logs map back to the right image.
    fn scan_containers(&self, statuses: &[ContainerStatus]) -> Vec<Container>;

    /// Turns one scan container's output into findings for `image_digest`.
    async fn parse_report(
        &self,
        image_digest: &str,
        logs: LogStream,
    ) -> Result<VulnerabilityScanResult>;
}
