use std::fmt::Debug;

use async_trait::async_trait;
use futures::future::BoxFuture;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Pod, ReplicationController},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Client, Resource,
    api::{DeleteParams, ListParams, LogParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use vulnwatch_model::{VulnerabilityReport, WorkloadKind, WorkloadRef};

use super::{
    ClusterStore, CreateOutcome, Labels, LogStream, LogsReader, ObjectKey,
    label_selector,
};
use crate::error::{Result, ScanError};

const HTTP_NOT_FOUND: u16 = 404;
const HTTP_CONFLICT: u16 = 409;

/// Typed fetch of a live workload, resolved to an owner reference.
type OwnerFetch = for<'a> fn(
    &'a Client,
    &'a WorkloadRef,
) -> BoxFuture<'a, Result<Option<OwnerReference>>>;

/// [`ClusterStore`] and [`LogsReader`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Maps a workload kind onto the typed fetch for that resource.
    fn owner_fetcher(kind: &WorkloadKind) -> Option<OwnerFetch> {
        let fetch: OwnerFetch = match kind {
            WorkloadKind::Pod => fetch_owner::<Pod>,
            WorkloadKind::ReplicaSet => fetch_owner::<ReplicaSet>,
            WorkloadKind::ReplicationController => {
                fetch_owner::<ReplicationController>
            }
            WorkloadKind::Deployment => fetch_owner::<Deployment>,
            WorkloadKind::StatefulSet => fetch_owner::<StatefulSet>,
            WorkloadKind::DaemonSet => fetch_owner::<DaemonSet>,
            WorkloadKind::CronJob => fetch_owner::<CronJob>,
            WorkloadKind::Job => fetch_owner::<Job>,
            WorkloadKind::Other(_) => return None,
        };
        Some(fetch)
    }
}

fn fetch_owner<'a, K>(
    client: &'a Client,
    workload: &'a WorkloadRef,
) -> BoxFuture<'a, Result<Option<OwnerReference>>>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + 'static,
{
    Box::pin(async move {
        let api: Api<K> = Api::namespaced(client.clone(), &workload.namespace);
        Ok(api
            .get_opt(&workload.name)
            .await?
            .and_then(|object| object.owner_ref(&())))
    })
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

async fn create<K>(api: &Api<K>, object: &K) -> Result<CreateOutcome>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(err) if is_status(&err, HTTP_CONFLICT) => {
            Ok(CreateOutcome::AlreadyExists)
        }
        Err(err) => Err(err.into()),
    }
}

async fn list<K>(api: &Api<K>, labels: &Labels) -> Result<Vec<K>>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    let params = ListParams::default().labels(&label_selector(labels));
    Ok(api.list(&params).await?.items)
}

#[async_trait]
impl ClusterStore for KubeCluster {
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>> {
        Ok(self.namespaced::<Pod>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn list_pods(&self, namespace: &str, labels: &Labels) -> Result<Vec<Pod>> {
        list(&self.namespaced::<Pod>(namespace), labels).await
    }

    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>> {
        Ok(self.namespaced::<Job>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn list_jobs(&self, namespace: &str, labels: &Labels) -> Result<Vec<Job>> {
        list(&self.namespaced::<Job>(namespace), labels).await
    }

    async fn create_job(&self, job: Job) -> Result<CreateOutcome> {
        let namespace = job.metadata.namespace.clone().ok_or_else(|| {
            ScanError::Internal("scan job has no namespace".into())
        })?;
        create(&self.namespaced::<Job>(&namespace), &job).await
    }

    async fn delete_job(&self, key: &ObjectKey) -> Result<()> {
        let api = self.namespaced::<Job>(&key.namespace);
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(err) if is_status(&err, HTTP_NOT_FOUND) => {
                debug!(job = %key, "scan job already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_reports(
        &self,
        namespace: &str,
        labels: &Labels,
    ) -> Result<Vec<VulnerabilityReport>> {
        list(&self.namespaced::<VulnerabilityReport>(namespace), labels).await
    }

    async fn get_report(&self, key: &ObjectKey) -> Result<Option<VulnerabilityReport>> {
        Ok(self
            .namespaced::<VulnerabilityReport>(&key.namespace)
            .get_opt(&key.name)
            .await?)
    }

    async fn create_report(&self, report: VulnerabilityReport) -> Result<CreateOutcome> {
        let namespace = report.metadata.namespace.clone().ok_or_else(|| {
            ScanError::Internal("vulnerability report has no namespace".into())
        })?;
        create(&self.namespaced::<VulnerabilityReport>(&namespace), &report).await
    }

    async fn delete_report(&self, key: &ObjectKey) -> Result<()> {
        let api = self.namespaced::<VulnerabilityReport>(&key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if is_status(&err, HTTP_NOT_FOUND) => {
                debug!(report = %key, "vulnerability report already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_workload(&self, workload: &WorkloadRef) -> Result<Option<OwnerReference>> {
        let fetch = Self::owner_fetcher(&workload.kind).ok_or_else(|| {
            ScanError::UnknownWorkloadKind(workload.kind.to_string())
        })?;
        fetch(&self.client, workload).await
    }
}

#[async_trait]
impl LogsReader for KubeCluster {
    async fn container_logs(&self, pod: &ObjectKey, container: &str) -> Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let stream = self
            .namespaced::<Pod>(&pod.namespace)
            .log_stream(&pod.name, &params)
            .await
            .map_err(|err| {
                ScanError::Logs(format!("{pod} container {container}: {err}"))
            })?;
        Ok(Box::pin(stream))
    }
}
