#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use k8s_openapi::api::{
    batch::v1::{Job, JobCondition, JobStatus},
    core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodCondition,
        PodSpec, PodStatus,
    },
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use vulnwatch_core::{
    AdmissionFilter, ClusterStore, CompletionProcessor, CreateOutcome, InMemoryCluster,
    JobReconciler, ObjectKey, PodReconciler, ReportStore, ScanTaskManager, TaskOptions,
    TrivyScanner, cluster::Labels,
};
use vulnwatch_model::{VulnerabilityReport, WorkloadRef, labels::LABEL_CONTROLLER_UID};

pub const OPERATOR_NAMESPACE: &str = "vulnwatch";

/// Trivy output with a single high severity finding.
pub const TRIVY_OUTPUT: &str = r#"[
  {
    "Target": "nginx:1.16 (debian 10.3)",
    "Vulnerabilities": [
      {
        "VulnerabilityID": "CVE-2020-1967",
        "PkgName": "libssl1.1",
        "InstalledVersion": "1.1.1d-0+deb10u2",
        "FixedVersion": "1.1.1d-0+deb10u3",
        "Severity": "HIGH"
      }
    ]
  }
]"#;

pub struct Harness {
    pub cluster: Arc<InMemoryCluster>,
    pub store: ReportStore,
    pub pods: PodReconciler,
    pub jobs: JobReconciler,
}

pub fn task_options() -> TaskOptions {
    TaskOptions {
        namespace: OPERATOR_NAMESPACE.to_string(),
        service_account: "vulnwatch-operator".to_string(),
        timeout: Duration::from_secs(300),
    }
}

pub fn task_manager(cluster: &Arc<InMemoryCluster>) -> ScanTaskManager {
    ScanTaskManager::new(
        cluster.clone(),
        Arc::new(TrivyScanner::default()),
        task_options(),
    )
}

pub fn processor(cluster: &Arc<InMemoryCluster>) -> CompletionProcessor {
    CompletionProcessor::new(
        cluster.clone(),
        cluster.clone(),
        Arc::new(TrivyScanner::default()),
        ReportStore::new(cluster.clone()),
    )
}

pub fn harness(target_namespaces: &[&str]) -> Harness {
    let cluster = Arc::new(InMemoryCluster::new());
    let admission = AdmissionFilter::new(
        OPERATOR_NAMESPACE,
        target_namespaces.iter().map(|ns| ns.to_string()).collect(),
    );
    let store = ReportStore::new(cluster.clone());
    Harness {
        pods: PodReconciler::new(
            cluster.clone(),
            admission,
            store.clone(),
            task_manager(&cluster),
        ),
        jobs: JobReconciler::new(cluster.clone(), OPERATOR_NAMESPACE, processor(&cluster)),
        store,
        cluster,
    }
}

/// A ready pod; `owner` is the controlling `(kind, name)` if any and
/// `containers` are `(name, digest)` pairs.
pub fn workload_pod(
    namespace: &str,
    name: &str,
    owner: Option<(&str, &str)>,
    containers: &[(&str, &str)],
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            owner_references: owner.map(|(kind, owner_name)| {
                vec![OwnerReference {
                    api_version: "apps/v1".into(),
                    kind: kind.into(),
                    name: owner_name.into(),
                    uid: format!("{owner_name}-uid"),
                    controller: Some(true),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        },
        spec: Some(PodSpec::default()),
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "ContainersReady".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            container_statuses: Some(
                containers
                    .iter()
                    .map(|(container, digest)| ContainerStatus {
                        name: container.to_string(),
                        image: format!("example/{container}:1.0"),
                        image_id: format!(
                            "docker-pullable://example/{container}@sha256:{digest}"
                        ),
                        ready: true,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// Plays the job controller: stamps a controller-uid selector on the job and
/// creates its single pod from the template.
pub async fn spawn_scan_pod(cluster: &InMemoryCluster, job_key: &ObjectKey) -> ObjectKey {
    let mut job = cluster
        .get_job(job_key)
        .await
        .expect("get job")
        .expect("scan job exists");
    let uid = job
        .metadata
        .uid
        .clone()
        .unwrap_or_else(|| format!("{}-uid", job_key.name));

    let spec = job.spec.get_or_insert_with(Default::default);
    spec.selector = Some(LabelSelector {
        match_labels: Some(BTreeMap::from([(LABEL_CONTROLLER_UID.to_string(), uid.clone())])),
        ..Default::default()
    });
    let template = spec.template.clone();
    cluster.insert_job(job).await.expect("update job");

    let mut labels = template
        .metadata
        .and_then(|meta| meta.labels)
        .unwrap_or_default();
    labels.insert(LABEL_CONTROLLER_UID.to_string(), uid);

    let pod_key = ObjectKey::new(job_key.namespace.clone(), format!("{}-x7k2p", job_key.name));
    cluster
        .insert_pod(Pod {
            metadata: ObjectMeta {
                name: Some(pod_key.name.clone()),
                namespace: Some(pod_key.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: template.spec,
            status: None,
        })
        .await
        .expect("insert scan pod");
    pod_key
}

/// Marks the job terminal with the given condition type.
pub async fn finish_job(cluster: &InMemoryCluster, job_key: &ObjectKey, condition: &str) {
    let mut job = cluster
        .get_job(job_key)
        .await
        .expect("get job")
        .expect("scan job exists");
    job.status = Some(JobStatus {
        conditions: Some(vec![JobCondition {
            type_: condition.into(),
            status: "True".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    cluster.insert_job(job).await.expect("update job");
}

/// Records a terminated state for a scan pod container.
pub async fn terminate_container(
    cluster: &InMemoryCluster,
    pod_key: &ObjectKey,
    container: &str,
    exit_code: i32,
) {
    let mut pod = cluster
        .get_pod(pod_key)
        .await
        .expect("get pod")
        .expect("scan pod exists");
    let status = pod.status.get_or_insert_with(Default::default);
    status
        .container_statuses
        .get_or_insert_with(Vec::new)
        .push(ContainerStatus {
            name: container.into(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Error".into()),
                    message: Some("image not found".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    cluster.insert_pod(pod).await.expect("update pod");
}

pub fn job_labels(job: &Job) -> BTreeMap<String, String> {
    job.metadata.labels.clone().unwrap_or_default()
}

/// Delegates to an [`InMemoryCluster`] but yields to the scheduler after
/// every job listing, so concurrent callers all finish their existence check
/// before any of them creates.
pub struct YieldingCluster(pub Arc<InMemoryCluster>);

#[async_trait]
impl ClusterStore for YieldingCluster {
    async fn get_pod(&self, key: &ObjectKey) -> vulnwatch_core::Result<Option<Pod>> {
        self.0.get_pod(key).await
    }

    async fn list_pods(&self, namespace: &str, labels: &Labels) -> vulnwatch_core::Result<Vec<Pod>> {
        self.0.list_pods(namespace, labels).await
    }

    async fn get_job(&self, key: &ObjectKey) -> vulnwatch_core::Result<Option<Job>> {
        self.0.get_job(key).await
    }

    async fn list_jobs(&self, namespace: &str, labels: &Labels) -> vulnwatch_core::Result<Vec<Job>> {
        let jobs = self.0.list_jobs(namespace, labels).await;
        tokio::task::yield_now().await;
        jobs
    }

    async fn create_job(&self, job: Job) -> vulnwatch_core::Result<CreateOutcome> {
        self.0.create_job(job).await
    }

    async fn delete_job(&self, key: &ObjectKey) -> vulnwatch_core::Result<()> {
        self.0.delete_job(key).await
    }

    async fn list_reports(
        &self,
        namespace: &str,
        labels: &Labels,
    ) -> vulnwatch_core::Result<Vec<VulnerabilityReport>> {
        self.0.list_reports(namespace, labels).await
    }

    async fn get_report(
        &self,
        key: &ObjectKey,
    ) -> vulnwatch_core::Result<Option<VulnerabilityReport>> {
        self.0.get_report(key).await
    }

    async fn create_report(
        &self,
        report: VulnerabilityReport,
    ) -> vulnwatch_core::Result<CreateOutcome> {
        self.0.create_report(report).await
    }

    async fn delete_report(&self, key: &ObjectKey) -> vulnwatch_core::Result<()> {
        self.0.delete_report(key).await
    }

    async fn get_workload(
        &self,
        workload: &WorkloadRef,
    ) -> vulnwatch_core::Result<Option<OwnerReference>> {
        self.0.get_workload(workload).await
    }
}
