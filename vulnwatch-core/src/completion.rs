//! Harvests finished scan jobs into reports, then disposes of them.
//!
//! Every job that reaches a terminal condition is deleted once it has been
//! processed, whatever the harvest outcome. A missed write heals on the next
//! pod reconciliation because the workload is still uncovered.

use std::{fmt, sync::Arc};

use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{ContainerStateTerminated, Pod},
};
use tracing::{debug, error, info, warn};
use vulnwatch_model::{
    ContainerImages, WorkloadRef,
    labels::{
        LABEL_BATCH_CONTROLLER_UID, LABEL_CONTROLLER_UID, LABEL_RESOURCE_NAME,
        LABEL_RESOURCE_NAMESPACE,
    },
};

use crate::cluster::{ClusterStore, Labels, LogsReader, ObjectKey};
use crate::error::{Result, ScanError};
use crate::reports::{ReportStore, WorkloadVulnerabilities, WriteOutcome};
use crate::resolver;
use crate::scanner::VulnerabilityScanner;

/// Terminal state observed on a scan job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskCondition {
    Complete,
    Failed,
    Unknown,
}

/// First `True` condition of a recognised terminal type.
pub fn terminal_condition(job: &Job) -> TaskCondition {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .into_iter()
        .flatten()
        .filter(|condition| condition.status == "True")
        .find_map(|condition| match condition.type_.as_str() {
            "Complete" => Some(TaskCondition::Complete),
            "Failed" => Some(TaskCondition::Failed),
            _ => None,
        })
        .unwrap_or(TaskCondition::Unknown)
}

/// What processing a terminal scan job amounted to. The job is gone in
/// every case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompletionOutcome {
    /// Reports were written for every container; `replaced` of them
    /// superseded a report for an older digest.
    Persisted {
        owner: WorkloadRef,
        containers: usize,
        replaced: usize,
    },
    /// The workload was deleted while it was being scanned.
    OwnerGone { owner: WorkloadRef },
    /// Another delivery already persisted the reports.
    AlreadyCovered { owner: WorkloadRef },
    /// Harvest succeeded but the store write failed.
    WriteFailed { owner: WorkloadRef, error: String },
    /// Job or its pod was malformed or unusable; nothing was written.
    Abandoned { reason: String },
    /// Failed job whose container diagnostics were logged.
    Diagnosed { failed_containers: usize },
}

pub struct CompletionProcessor {
    cluster: Arc<dyn ClusterStore>,
    logs: Arc<dyn LogsReader>,
    scanner: Arc<dyn VulnerabilityScanner>,
    store: ReportStore,
}

impl fmt::Debug for CompletionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionProcessor")
            .field("cluster", &"ClusterStore")
            .field("logs", &"LogsReader")
            .field("scanner", &"VulnerabilityScanner")
            .field("store", &self.store)
            .finish()
    }
}

impl CompletionProcessor {
    pub fn new(
        cluster: Arc<dyn ClusterStore>,
        logs: Arc<dyn LogsReader>,
        scanner: Arc<dyn VulnerabilityScanner>,
        store: ReportStore,
    ) -> Self {
        Self {
            cluster,
            logs,
            scanner,
            store,
        }
    }

    pub async fn process_complete(&self, job: &Job) -> Result<CompletionOutcome> {
        let key = job_key(job)?;

        let (owner, images) = match owner_and_images(job) {
            Ok(resolved) => resolved,
            Err(err) if !err.is_retryable() => {
                return self.abandon(&key, err).await;
            }
            Err(err) => return Err(err),
        };

        if self.store.has_reports(&owner, &images).await? {
            debug!(job = %key, owner = %owner, "vulnerability reports already exist");
            self.delete(&key).await?;
            return Ok(CompletionOutcome::AlreadyCovered { owner });
        }

        let pod = match self.controlled_pod(job).await {
            Ok(pod) => pod,
            Err(err) if !err.is_retryable() => return self.abandon(&key, err).await,
            Err(err) => return Err(err),
        };

        let reports = match self.harvest(&pod, &images).await {
            Ok(reports) => reports,
            Err(err) => return self.abandon(&key, err).await,
        };

        info!(job = %key, owner = %owner, containers = reports.len(), "writing vulnerability reports");
        let outcome = match self.store.write(&owner, reports, &images).await {
            Ok(WriteOutcome::Written(summary)) => CompletionOutcome::Persisted {
                owner,
                containers: summary.containers(),
                replaced: summary.replaced,
            },
            Ok(WriteOutcome::OwnerGone) => CompletionOutcome::OwnerGone { owner },
            Err(err) => {
                warn!(job = %key, owner = %owner, error = %err, "error writing vulnerability reports");
                CompletionOutcome::WriteFailed {
                    owner,
                    error: err.to_string(),
                }
            }
        };

        self.delete(&key).await?;
        Ok(outcome)
    }

    pub async fn process_failed(&self, job: &Job) -> Result<CompletionOutcome> {
        let key = job_key(job)?;

        let pod = match self.controlled_pod(job).await {
            Ok(pod) => pod,
            Err(err) if !err.is_retryable() => return self.abandon(&key, err).await,
            Err(err) => return Err(err),
        };

        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let resource = labels.get(LABEL_RESOURCE_NAME).map(String::as_str).unwrap_or_default();
        let resource_namespace = labels
            .get(LABEL_RESOURCE_NAMESPACE)
            .map(String::as_str)
            .unwrap_or_default();

        let mut failed_containers = 0;
        for (container, state) in terminated_containers(&pod) {
            if state.exit_code == 0 {
                continue;
            }
            failed_containers += 1;
            error!(
                job = %key,
                container = %container,
                resource,
                resource_namespace,
                exit_code = state.exit_code,
                reason = state.reason.as_deref().unwrap_or_default(),
                message = state.message.as_deref().unwrap_or_default(),
                "scan job container failed"
            );
        }

        debug!(job = %key, "deleting failed scan job");
        self.delete(&key).await?;
        Ok(CompletionOutcome::Diagnosed { failed_containers })
    }

    /// The single pod created for `job`, found through its controller-uid
    /// selector.
    pub async fn controlled_pod(&self, job: &Job) -> Result<Pod> {
        let key = job_key(job)?;
        let selector = controller_selector(job).ok_or_else(|| {
            ScanError::MissingSelector(format!("controller-uid not found for job {key}"))
        })?;

        let mut pods = self.cluster.list_pods(&key.namespace, &selector).await?;
        if pods.len() != 1 {
            return Err(ScanError::PodResolution {
                job: key.to_string(),
                found: pods.len(),
            });
        }
        Ok(pods.remove(0))
    }

    /// Parses every scan container's output; the first failure discards the
    /// whole batch.
    async fn harvest(
        &self,
        pod: &Pod,
        images: &ContainerImages,
    ) -> Result<WorkloadVulnerabilities> {
        let key = ObjectKey::of(pod)
            .ok_or_else(|| ScanError::MalformedData("scan pod without name".into()))?;
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        let mut reports = WorkloadVulnerabilities::new();
        for container in containers {
            let digest = images.get(&container.name).ok_or_else(|| {
                ScanError::MalformedData(format!(
                    "no image recorded for scan container {}",
                    container.name
                ))
            })?;
            let logs = self.logs.container_logs(&key, &container.name).await?;
            let report = self.scanner.parse_report(digest, logs).await?;
            reports.insert(container.name.clone(), report);
        }
        Ok(reports)
    }

    async fn abandon(&self, key: &ObjectKey, err: ScanError) -> Result<CompletionOutcome> {
        warn!(job = %key, error = %err, "abandoning scan job");
        self.delete(key).await?;
        Ok(CompletionOutcome::Abandoned {
            reason: err.to_string(),
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        debug!(job = %key, "deleting scan job");
        self.cluster.delete_job(key).await
    }
}

fn job_key(job: &Job) -> Result<ObjectKey> {
    ObjectKey::of(job).ok_or_else(|| ScanError::MalformedData("scan job without name".into()))
}

fn owner_and_images(job: &Job) -> Result<(WorkloadRef, ContainerImages)> {
    Ok((resolver::owner_from_job(job)?, resolver::images_from_job(job)?))
}

fn controller_selector(job: &Job) -> Option<Labels> {
    let match_labels = job
        .spec
        .as_ref()?
        .selector
        .as_ref()?
        .match_labels
        .as_ref()?;

    [LABEL_CONTROLLER_UID, LABEL_BATCH_CONTROLLER_UID]
        .into_iter()
        .find_map(|key| {
            match_labels
                .get(key)
                .map(|uid| Labels::from([(key.to_string(), uid.clone())]))
        })
}

fn terminated_containers(pod: &Pod) -> Vec<(String, ContainerStateTerminated)> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };

    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|container| {
            let terminated = container.state.as_ref()?.terminated.clone()?;
            Some((container.name.clone(), terminated))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn job_with(conditions: &[(&str, &str)]) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(type_, status)| JobCondition {
                            type_: type_.to_string(),
                            status: status.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn recognises_terminal_conditions() {
        assert_eq!(terminal_condition(&job_with(&[("Complete", "True")])), TaskCondition::Complete);
        assert_eq!(terminal_condition(&job_with(&[("Failed", "True")])), TaskCondition::Failed);
    }

    #[test]
    fn interim_conditions_are_skipped() {
        let job = job_with(&[("SuccessCriteriaMet", "True"), ("Complete", "True")]);
        assert_eq!(terminal_condition(&job), TaskCondition::Complete);

        let job = job_with(&[("FailureTarget", "True"), ("Failed", "False")]);
        assert_eq!(terminal_condition(&job), TaskCondition::Unknown);
    }

    #[test]
    fn no_conditions_is_unknown() {
        assert_eq!(terminal_condition(&Job::default()), TaskCondition::Unknown);
    }
}
