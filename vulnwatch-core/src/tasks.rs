//! Scan job lifecycle: at most one in-flight scan job per workload.
//!
//! There is no lock. The existence check keeps the common case cheap and
//! the deterministic job name makes the store reject a second creator, which
//! is then reported as an in-flight job rather than an error.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{PodSpec, PodStatus, PodTemplateSpec},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use vulnwatch_model::{
    ContainerImages, WorkloadRef,
    labels::{ANNOTATION_CONTAINER_IMAGES, LABEL_MANAGED_BY, MANAGED_BY_OPERATOR},
};

use crate::cluster::{ClusterStore, CreateOutcome, ObjectKey};
use crate::error::Result;
use crate::resolver;
use crate::scanner::VulnerabilityScanner;

const TASK_NAME_PREFIX: &str = "scan-vulnerabilityreport-";

/// Static settings applied to every scan job.
#[derive(Clone, Debug)]
pub struct TaskOptions {
    /// Namespace scan jobs run in; the operator's own namespace.
    pub namespace: String,
    pub service_account: String,
    pub timeout: Duration,
}

/// Result of [`ScanTaskManager::ensure_task`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnsureOutcome {
    Created(ObjectKey),
    InFlight(ObjectKey),
}

pub struct ScanTaskManager {
    cluster: Arc<dyn ClusterStore>,
    scanner: Arc<dyn VulnerabilityScanner>,
    options: TaskOptions,
}

impl fmt::Debug for ScanTaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanTaskManager")
            .field("cluster", &"ClusterStore")
            .field("scanner", &"VulnerabilityScanner")
            .field("options", &self.options)
            .finish()
    }
}

/// Stable job name for a workload: same owner, same name, so concurrent
/// creators collide.
pub fn task_name(owner: &WorkloadRef) -> String {
    let digest = Sha256::digest(
        format!("{}/{}/{}", owner.namespace, owner.kind, owner.name).as_bytes(),
    );
    let mut name = hex::encode(digest);
    name.truncate(16);
    format!("{TASK_NAME_PREFIX}{name}")
}

impl ScanTaskManager {
    pub fn new(
        cluster: Arc<dyn ClusterStore>,
        scanner: Arc<dyn VulnerabilityScanner>,
        options: TaskOptions,
    ) -> Self {
        Self {
            cluster,
            scanner,
            options,
        }
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Makes sure a scan job covering `owner` exists.
    pub async fn ensure_task(
        &self,
        owner: &WorkloadRef,
        status: &PodStatus,
    ) -> Result<EnsureOutcome> {
        let existing = self
            .cluster
            .list_jobs(&self.options.namespace, &owner.labels())
            .await?;

        if let Some(job) = existing.first().and_then(ObjectKey::of) {
            debug!(owner = %owner, job = %job, "scan job already exists");
            return Ok(EnsureOutcome::InFlight(job));
        }

        let job = self.build_task(owner, status)?;
        let key = ObjectKey::new(self.options.namespace.clone(), task_name(owner));

        match self.cluster.create_job(job).await? {
            CreateOutcome::Created => {
                info!(owner = %owner, job = %key, "scan job created");
                Ok(EnsureOutcome::Created(key))
            }
            CreateOutcome::AlreadyExists => {
                debug!(owner = %owner, job = %key, "scan job created concurrently");
                Ok(EnsureOutcome::InFlight(key))
            }
        }
    }

    /// Builds the scan job: owner triple as labels, the image map as an
    /// annotation, and the scanner's containers in a never-restarting pod.
    pub fn build_task(&self, owner: &WorkloadRef, status: &PodStatus) -> Result<Job> {
        let images: ContainerImages = resolver::images_from_status(Some(status));
        let statuses = status.container_statuses.clone().unwrap_or_default();

        let mut labels = owner.labels();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string());

        let timeout = i64::try_from(self.options.timeout.as_secs()).unwrap_or(i64::MAX);

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(task_name(owner)),
                namespace: Some(self.options.namespace.clone()),
                labels: Some(labels.clone()),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_CONTAINER_IMAGES.to_string(),
                    images.to_json()?,
                )])),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                completions: Some(1),
                active_deadline_seconds: Some(timeout),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".into()),
                        service_account_name: Some(self.options.service_account.clone()),
                        automount_service_account_token: Some(false),
                        containers: self.scanner.scan_containers(&statuses),
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            ..Job::default()
        })
    }
}
