use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use tokio::sync::Mutex;
use vulnwatch_model::{VulnerabilityReport, WorkloadKind, WorkloadRef};

use super::{
    ClusterStore, CreateOutcome, Labels, LogStream, LogsReader, ObjectKey,
    labels_match,
};
use crate::error::{Result, ScanError};

/// In-process cluster used by tests and dry runs. Every operation runs under
/// a single lock, which gives `create_*` the same atomic create-or-conflict
/// behaviour the API server provides.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    pods: BTreeMap<ObjectKey, Pod>,
    jobs: BTreeMap<ObjectKey, Job>,
    reports: BTreeMap<ObjectKey, VulnerabilityReport>,
    workloads: HashMap<WorkloadRef, OwnerReference>,
    logs: HashMap<(ObjectKey, String), Vec<u8>>,
    failing_reports: HashSet<String>,
    job_creates: usize,
    deleted_jobs: Vec<ObjectKey>,
    next_uid: u64,
}

impl ClusterState {
    fn uid(&mut self) -> String {
        self.next_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.next_uid)
    }
}

impl fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryCluster");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("pods", &state.pods.len())
                    .field("jobs", &state.jobs.len())
                    .field("reports", &state.reports.len())
                    .field("workloads", &state.workloads.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

fn key_of<K: Resource>(object: &K, what: &str) -> Result<ObjectKey> {
    ObjectKey::of(object)
        .ok_or_else(|| ScanError::Internal(format!("{what} without namespace/name")))
}

fn api_version_for(kind: &WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Pod | WorkloadKind::ReplicationController => "v1",
        WorkloadKind::ReplicaSet
        | WorkloadKind::Deployment
        | WorkloadKind::StatefulSet
        | WorkloadKind::DaemonSet => "apps/v1",
        WorkloadKind::CronJob | WorkloadKind::Job => "batch/v1",
        WorkloadKind::Other(_) => "unknown/v1",
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pod(&self, pod: Pod) -> Result<()> {
        let key = key_of(&pod, "pod")?;
        self.state.lock().await.pods.insert(key, pod);
        Ok(())
    }

    pub async fn insert_job(&self, job: Job) -> Result<()> {
        let key = key_of(&job, "job")?;
        self.state.lock().await.jobs.insert(key, job);
        Ok(())
    }

    pub async fn insert_report(&self, report: VulnerabilityReport) -> Result<()> {
        let key = key_of(&report, "report")?;
        self.state.lock().await.reports.insert(key, report);
        Ok(())
    }

    pub async fn remove_report(&self, key: &ObjectKey) -> Option<VulnerabilityReport> {
        self.state.lock().await.reports.remove(key)
    }

    /// Registers a live workload object so reports can reference it.
    pub async fn insert_workload(&self, workload: WorkloadRef) -> OwnerReference {
        let mut state = self.state.lock().await;
        let owner = OwnerReference {
            api_version: api_version_for(&workload.kind).to_string(),
            kind: workload.kind.to_string(),
            name: workload.name.clone(),
            uid: state.uid(),
            ..OwnerReference::default()
        };
        state.workloads.insert(workload, owner.clone());
        owner
    }

    pub async fn set_logs(
        &self,
        pod: &ObjectKey,
        container: &str,
        output: impl Into<Vec<u8>>,
    ) {
        self.state
            .lock()
            .await
            .logs
            .insert((pod.clone(), container.to_string()), output.into());
    }

    /// Makes every future create of the named report fail with a transport
    /// error.
    pub async fn fail_report_writes(&self, report_name: &str) {
        self.state
            .lock()
            .await
            .failing_reports
            .insert(report_name.to_string());
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    pub async fn reports(&self) -> Vec<VulnerabilityReport> {
        self.state.lock().await.reports.values().cloned().collect()
    }

    pub async fn report(&self, key: &ObjectKey) -> Option<VulnerabilityReport> {
        self.state.lock().await.reports.get(key).cloned()
    }

    /// Number of job creations that actually stored a new object.
    pub async fn job_creates(&self) -> usize {
        self.state.lock().await.job_creates
    }

    pub async fn deleted_jobs(&self) -> Vec<ObjectKey> {
        self.state.lock().await.deleted_jobs.clone()
    }
}

#[async_trait]
impl ClusterStore for InMemoryCluster {
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>> {
        Ok(self.state.lock().await.pods.get(key).cloned())
    }

    async fn list_pods(&self, namespace: &str, labels: &Labels) -> Result<Vec<Pod>> {
        let state = self.state.lock().await;
        Ok(state
            .pods
            .iter()
            .filter(|(key, pod)| {
                key.namespace == namespace
                    && labels_match(pod.metadata.labels.as_ref(), labels)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(key).cloned())
    }

    async fn list_jobs(&self, namespace: &str, labels: &Labels) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|(key, job)| {
                key.namespace == namespace
                    && labels_match(job.metadata.labels.as_ref(), labels)
            })
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn create_job(&self, mut job: Job) -> Result<CreateOutcome> {
        let key = key_of(&job, "job")?;
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        job.metadata.uid = Some(state.uid());
        state.jobs.insert(key, job);
        state.job_creates += 1;
        Ok(CreateOutcome::Created)
    }

    async fn delete_job(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.remove(key).is_some() {
            state.deleted_jobs.push(key.clone());
        }
        Ok(())
    }

    async fn list_reports(
        &self,
        namespace: &str,
        labels: &Labels,
    ) -> Result<Vec<VulnerabilityReport>> {
        let state = self.state.lock().await;
        Ok(state
            .reports
            .iter()
            .filter(|(key, report)| {
                key.namespace == namespace
                    && labels_match(report.metadata.labels.as_ref(), labels)
            })
            .map(|(_, report)| report.clone())
            .collect())
    }

    async fn get_report(&self, key: &ObjectKey) -> Result<Option<VulnerabilityReport>> {
        Ok(self.state.lock().await.reports.get(key).cloned())
    }

    async fn create_report(&self, mut report: VulnerabilityReport) -> Result<CreateOutcome> {
        let key = key_of(&report, "report")?;
        let mut state = self.state.lock().await;
        if state.failing_reports.contains(&key.name) {
            return Err(ScanError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("injected failure writing {key}"),
            )));
        }
        if state.reports.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        report.metadata.uid = Some(state.uid());
        state.reports.insert(key, report);
        Ok(CreateOutcome::Created)
    }

    async fn delete_report(&self, key: &ObjectKey) -> Result<()> {
        self.state.lock().await.reports.remove(key);
        Ok(())
    }

    async fn get_workload(&self, workload: &WorkloadRef) -> Result<Option<OwnerReference>> {
        if let WorkloadKind::Other(kind) = &workload.kind {
            return Err(ScanError::UnknownWorkloadKind(kind.clone()));
        }
        Ok(self.state.lock().await.workloads.get(workload).cloned())
    }
}

#[async_trait]
impl LogsReader for InMemoryCluster {
    async fn container_logs(&self, pod: &ObjectKey, container: &str) -> Result<LogStream> {
        let state = self.state.lock().await;
        let output = state
            .logs
            .get(&(pod.clone(), container.to_string()))
            .cloned()
            .ok_or_else(|| {
                ScanError::Logs(format!("no logs for {pod} container {container}"))
            })?;
        Ok(Box::pin(futures::io::Cursor::new(output)))
    }
}
