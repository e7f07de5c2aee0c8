//! Ports onto the declarative resource store.
//!
//! The reconcilers never hold state between invocations, so every decision
//! they make is a read against these ports and every effect is a write
//! through them. Implementations must make `create_*` atomic: the store, not
//! the caller, arbitrates concurrent creators by reporting
//! [`CreateOutcome::AlreadyExists`].

pub mod kubernetes;
pub mod memory;

use std::{collections::BTreeMap, fmt, pin::Pin};

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use vulnwatch_model::{VulnerabilityReport, WorkloadRef};

use crate::error::Result;

pub use self::kubernetes::KubeCluster;
pub use self::memory::InMemoryCluster;

pub type Labels = BTreeMap<String, String>;

/// Streamed container output handed to the scanner.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Namespace/name pair identifying a namespaced object.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a stored object; `None` when metadata is incomplete.
    pub fn of<K: kube::Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of an idempotent create.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Generic CRUD over the objects the protocol touches. Not-found on read is
/// `Ok(None)`; not-found on delete is `Ok(())`.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>>;

    async fn list_pods(&self, namespace: &str, labels: &Labels) -> Result<Vec<Pod>>;

    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>>;

    async fn list_jobs(&self, namespace: &str, labels: &Labels) -> Result<Vec<Job>>;

    async fn create_job(&self, job: Job) -> Result<CreateOutcome>;

    /// Deletes with background propagation so the job's pods follow.
    async fn delete_job(&self, key: &ObjectKey) -> Result<()>;

    async fn list_reports(
        &self,
        namespace: &str,
        labels: &Labels,
    ) -> Result<Vec<VulnerabilityReport>>;

    async fn get_report(&self, key: &ObjectKey) -> Result<Option<VulnerabilityReport>>;

    async fn create_report(&self, report: VulnerabilityReport) -> Result<CreateOutcome>;

    async fn delete_report(&self, key: &ObjectKey) -> Result<()>;

    /// Resolves the live workload object into an owner reference suitable
    /// for garbage-collection cascading.
    async fn get_workload(&self, workload: &WorkloadRef) -> Result<Option<OwnerReference>>;
}

/// Opens a container's output stream.
#[async_trait]
pub trait LogsReader: Send + Sync {
    async fn container_logs(&self, pod: &ObjectKey, container: &str) -> Result<LogStream>;
}

/// Renders `labels` as an equality-based selector string.
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every `selector` entry is present in `labels`.
pub fn labels_match(labels: Option<&Labels>, selector: &Labels) -> bool {
    selector.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_comma_joined_in_key_order() {
        let labels = Labels::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a=1,b=2");
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(labels_match(None, &Labels::new()));
        let selector = Labels::from([("a".to_string(), "1".to_string())]);
        assert!(!labels_match(None, &selector));
    }
}
