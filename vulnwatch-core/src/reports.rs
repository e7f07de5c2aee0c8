//! Persistence of vulnerability reports keyed by workload and container.

use std::{collections::BTreeMap, fmt, sync::Arc};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::{debug, info, warn};
use vulnwatch_model::{
    ContainerImages, VulnerabilityReport, VulnerabilityReportSpec,
    VulnerabilityScanResult, WorkloadRef,
    labels::{ANNOTATION_IMAGE_HASH, LABEL_CONTAINER_NAME},
};

use crate::cluster::{ClusterStore, CreateOutcome, Labels, ObjectKey};
use crate::error::{Result, ScanError};

/// Findings per container name for one workload.
pub type WorkloadVulnerabilities = BTreeMap<String, VulnerabilityScanResult>;

/// Per-container tally of a successful [`ReportStore::write`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteSummary {
    pub created: usize,
    /// Existing report carried an older digest and was recreated.
    pub replaced: usize,
    /// Existing report already recorded this digest.
    pub unchanged: usize,
}

impl WriteSummary {
    pub fn containers(&self) -> usize {
        self.created + self.replaced + self.unchanged
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    Written(WriteSummary),
    /// The workload was deleted before the write; nothing was stored.
    OwnerGone,
}

/// How a single container's report ended up in the store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ContainerWrite {
    Created,
    Replaced,
    Unchanged,
}

#[derive(Clone)]
pub struct ReportStore {
    cluster: Arc<dyn ClusterStore>,
}

impl fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportStore")
            .field("cluster", &"ClusterStore")
            .finish()
    }
}

fn image_hash(report: &VulnerabilityReport) -> Option<&str> {
    report
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_IMAGE_HASH))
        .map(String::as_str)
}

impl ReportStore {
    pub fn new(cluster: Arc<dyn ClusterStore>) -> Self {
        Self { cluster }
    }

    /// Creates one report per container, owned by the live workload. An
    /// existing report for the same digest counts as written; one recording
    /// an older digest is replaced so coverage can converge. Containers are
    /// independent: a failure is reported after every sibling was attempted
    /// and nothing already written is rolled back.
    pub async fn write(
        &self,
        workload: &WorkloadRef,
        reports: WorkloadVulnerabilities,
        images: &ContainerImages,
    ) -> Result<WriteOutcome> {
        let Some(owner) = self.cluster.get_workload(workload).await? else {
            warn!(owner = %workload, "workload no longer exists, skipping report write");
            return Ok(WriteOutcome::OwnerGone);
        };

        let mut summary = WriteSummary::default();
        let mut failed = Vec::new();
        let mut first_error = None;

        for (container, report) in reports {
            let outcome = match images.get(&container) {
                Some(digest) => {
                    let record = build_report(workload, &container, digest, report, owner.clone());
                    self.put(record, digest).await
                }
                None => Err(ScanError::MalformedData(format!(
                    "no image digest recorded for container {container}"
                ))),
            };

            match outcome {
                Ok(ContainerWrite::Created) => {
                    info!(owner = %workload, container = %container, "vulnerability report created");
                    summary.created += 1;
                }
                Ok(ContainerWrite::Replaced) => {
                    info!(owner = %workload, container = %container, "stale vulnerability report replaced");
                    summary.replaced += 1;
                }
                Ok(ContainerWrite::Unchanged) => {
                    debug!(owner = %workload, container = %container, "vulnerability report already exists");
                    summary.unchanged += 1;
                }
                Err(err) => {
                    warn!(owner = %workload, container = %container, error = %err, "failed to write vulnerability report");
                    failed.push(container);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => Ok(WriteOutcome::Written(summary)),
            Some(source) => Err(ScanError::PartialWrite {
                containers: failed,
                source: Box::new(source),
            }),
        }
    }

    /// Create-or-conflict, then compare the conflicting record's digest.
    /// A second conflict after the stale record was removed means a
    /// concurrent writer stored a fresh one first.
    async fn put(&self, record: VulnerabilityReport, digest: &str) -> Result<ContainerWrite> {
        let key = ObjectKey::of(&record)
            .ok_or_else(|| ScanError::Internal("vulnerability report without name".into()))?;

        if self.cluster.create_report(record.clone()).await? == CreateOutcome::Created {
            return Ok(ContainerWrite::Created);
        }

        match self.cluster.get_report(&key).await? {
            Some(existing) if image_hash(&existing) == Some(digest) => {
                return Ok(ContainerWrite::Unchanged);
            }
            Some(existing) => {
                warn!(
                    report = %key,
                    stored = image_hash(&existing).unwrap_or_default(),
                    current = digest,
                    "vulnerability report records a different image digest"
                );
                self.cluster.delete_report(&key).await?;
            }
            // Deleted between the conflict and the read.
            None => {}
        }
        match self.cluster.create_report(record).await? {
            CreateOutcome::Created => Ok(ContainerWrite::Replaced),
            CreateOutcome::AlreadyExists => Ok(ContainerWrite::Unchanged),
        }
    }

    /// First report among the workload's reports whose recorded digest
    /// equals `digest`, independent of report name.
    pub async fn read(
        &self,
        workload: &WorkloadRef,
        digest: &str,
    ) -> Result<Option<VulnerabilityScanResult>> {
        self.find(workload, workload.labels(), digest).await
    }

    /// Like [`Self::read`] but additionally keyed on the container name.
    pub async fn read_container(
        &self,
        workload: &WorkloadRef,
        container: &str,
        digest: &str,
    ) -> Result<Option<VulnerabilityScanResult>> {
        let mut selector = workload.labels();
        selector.insert(LABEL_CONTAINER_NAME.to_string(), container.to_string());
        self.find(workload, selector, digest).await
    }

    /// True only when every container image has a report for its current
    /// digest. An empty image set is vacuously covered.
    pub async fn has_reports(
        &self,
        workload: &WorkloadRef,
        images: &ContainerImages,
    ) -> Result<bool> {
        for (container, digest) in images.iter() {
            if self.read_container(workload, container, digest).await?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn find(
        &self,
        workload: &WorkloadRef,
        selector: Labels,
        digest: &str,
    ) -> Result<Option<VulnerabilityScanResult>> {
        let reports = self
            .cluster
            .list_reports(&workload.namespace, &selector)
            .await?;
        Ok(reports
            .into_iter()
            .find(|report| image_hash(report) == Some(digest))
            .map(|report| report.spec.report))
    }
}

fn build_report(
    workload: &WorkloadRef,
    container: &str,
    digest: &str,
    report: VulnerabilityScanResult,
    owner: OwnerReference,
) -> VulnerabilityReport {
    let mut labels = workload.labels();
    labels.insert(LABEL_CONTAINER_NAME.to_string(), container.to_string());

    VulnerabilityReport {
        metadata: ObjectMeta {
            name: Some(workload.report_name(container)),
            namespace: Some(workload.namespace.clone()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_IMAGE_HASH.to_string(),
                digest.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: VulnerabilityReportSpec { report },
    }
}
