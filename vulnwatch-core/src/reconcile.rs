//! Entry points for pod and scan-job change notifications.
//!
//! Both reconcilers are stateless: each call reads what it needs from the
//! cluster and may be repeated, reordered or run concurrently with any other
//! call. A returned error asks the caller to redeliver later.

use std::{fmt, sync::Arc};

use tracing::{debug, debug_span, info, Instrument};
use vulnwatch_model::labels::{LABEL_MANAGED_BY, MANAGED_BY_OPERATOR};

use crate::admission::{Admission, AdmissionFilter, SkipReason};
use crate::cluster::{ClusterStore, ObjectKey};
use crate::completion::{CompletionOutcome, CompletionProcessor, TaskCondition, terminal_condition};
use crate::error::Result;
use crate::reports::ReportStore;
use crate::resolver;
use crate::tasks::{EnsureOutcome, ScanTaskManager};

/// What a pod reconciliation did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PodOutcome {
    Skipped(SkipReason),
    /// The pod no longer exists.
    Gone,
    /// Container statuses are not reported yet.
    NoImages,
    /// Every container image already has a report.
    Covered,
    Scan(EnsureOutcome),
}

/// What a scan-job reconciliation did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    /// Outside the operator namespace or not created by it.
    Ignored,
    Gone,
    /// No terminal condition yet.
    Pending,
    Processed(CompletionOutcome),
}

pub struct PodReconciler {
    cluster: Arc<dyn ClusterStore>,
    admission: AdmissionFilter,
    store: ReportStore,
    tasks: ScanTaskManager,
}

impl fmt::Debug for PodReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodReconciler")
            .field("admission", &self.admission)
            .field("store", &self.store)
            .field("tasks", &self.tasks)
            .finish()
    }
}

impl PodReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterStore>,
        admission: AdmissionFilter,
        store: ReportStore,
        tasks: ScanTaskManager,
    ) -> Self {
        Self {
            cluster,
            admission,
            store,
            tasks,
        }
    }

    /// Desired state: the pod's workload has a report for every current
    /// container image, or a scan job is pending for it.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<PodOutcome> {
        self.reconcile_inner(key)
            .instrument(debug_span!("reconcile_pod", pod = %key))
            .await
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<PodOutcome> {
        if self.admission.excludes_namespace(&key.namespace) {
            debug!("ignoring pod run in the operator namespace");
            return Ok(PodOutcome::Skipped(SkipReason::OperatorNamespace));
        }

        let Some(pod) = self.cluster.get_pod(key).await? else {
            debug!("ignoring pod that must have been deleted");
            return Ok(PodOutcome::Gone);
        };

        if let Admission::Skip(reason) = self.admission.admit(&pod) {
            debug!(%reason, "ignoring pod");
            return Ok(PodOutcome::Skipped(reason));
        }

        let owner = resolver::resolve_owner(&pod);
        debug!(owner = %owner, "resolved immediate pod owner");

        let Some(status) = pod.status.as_ref() else {
            return Ok(PodOutcome::NoImages);
        };
        let images = resolver::images_from_status(Some(status));
        if images.is_empty() {
            debug!("ignoring pod without container statuses");
            return Ok(PodOutcome::NoImages);
        }

        if self.store.has_reports(&owner, &images).await? {
            debug!(owner = %owner, "ignoring pod that already has vulnerability reports");
            return Ok(PodOutcome::Covered);
        }

        let outcome = self.tasks.ensure_task(&owner, status).await?;
        Ok(PodOutcome::Scan(outcome))
    }
}

pub struct JobReconciler {
    cluster: Arc<dyn ClusterStore>,
    operator_namespace: String,
    processor: CompletionProcessor,
}

impl fmt::Debug for JobReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobReconciler")
            .field("operator_namespace", &self.operator_namespace)
            .field("processor", &self.processor)
            .finish()
    }
}

impl JobReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterStore>,
        operator_namespace: impl Into<String>,
        processor: CompletionProcessor,
    ) -> Self {
        Self {
            cluster,
            operator_namespace: operator_namespace.into(),
            processor,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<JobOutcome> {
        self.reconcile_inner(key)
            .instrument(debug_span!("reconcile_job", job = %key))
            .await
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<JobOutcome> {
        if key.namespace != self.operator_namespace {
            debug!("ignoring job not managed by this operator");
            return Ok(JobOutcome::Ignored);
        }

        let Some(job) = self.cluster.get_job(key).await? else {
            debug!("ignoring job that must have been deleted");
            return Ok(JobOutcome::Gone);
        };

        let managed = job
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_MANAGED_BY))
            .is_some_and(|value| value == MANAGED_BY_OPERATOR);
        if !managed {
            debug!("ignoring job not managed by this operator");
            return Ok(JobOutcome::Ignored);
        }

        let outcome = match terminal_condition(&job) {
            TaskCondition::Complete => self.processor.process_complete(&job).await?,
            TaskCondition::Failed => self.processor.process_failed(&job).await?,
            TaskCondition::Unknown => {
                debug!("ignoring job without a terminal condition");
                return Ok(JobOutcome::Pending);
            }
        };

        info!(?outcome, "scan job processed");
        Ok(JobOutcome::Processed(outcome))
    }
}
