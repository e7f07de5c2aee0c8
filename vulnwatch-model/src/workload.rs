use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::{ModelError, Result};
use crate::labels::{
    LABEL_RESOURCE_KIND, LABEL_RESOURCE_NAME, LABEL_RESOURCE_NAMESPACE,
};

/// Kinds of workload the operator attributes scans to. Controllers it does
/// not know about are kept verbatim so they still correlate by label.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Pod,
    ReplicaSet,
    ReplicationController,
    Deployment,
    StatefulSet,
    DaemonSet,
    CronJob,
    Job,
    Other(String),
}

impl WorkloadKind {
    pub fn as_str(&self) -> &str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::ReplicationController => "ReplicationController",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Job => "Job",
            WorkloadKind::Other(kind) => kind,
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Pod" => WorkloadKind::Pod,
            "ReplicaSet" => WorkloadKind::ReplicaSet,
            "ReplicationController" => WorkloadKind::ReplicationController,
            "Deployment" => WorkloadKind::Deployment,
            "StatefulSet" => WorkloadKind::StatefulSet,
            "DaemonSet" => WorkloadKind::DaemonSet,
            "CronJob" => WorkloadKind::CronJob,
            "Job" => WorkloadKind::Job,
            other => WorkloadKind::Other(other.to_string()),
        })
    }
}

impl From<&str> for WorkloadKind {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WorkloadKind {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkloadKind {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(WorkloadKind::from(raw.as_str()))
    }
}

/// The resource a scan or report is attributed to. Derived, never stored on
/// its own; it travels as labels on scan jobs and reports.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(
        kind: impl Into<WorkloadKind>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reads the owner triple back from labels written by [`Self::labels`].
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Result<Self> {
        let lookup = |key: &'static str| {
            labels
                .get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or(ModelError::MissingLabel(key))
        };

        Ok(Self {
            kind: WorkloadKind::from(lookup(LABEL_RESOURCE_KIND)?.as_str()),
            name: lookup(LABEL_RESOURCE_NAME)?,
            namespace: lookup(LABEL_RESOURCE_NAMESPACE)?,
        })
    }

    /// Owner triple as labels; doubles as the selector for existence checks.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_RESOURCE_KIND.to_string(), self.kind.to_string()),
            (LABEL_RESOURCE_NAME.to_string(), self.name.clone()),
            (LABEL_RESOURCE_NAMESPACE.to_string(), self.namespace.clone()),
        ])
    }

    /// Deterministic report name for one of this workload's containers.
    pub fn report_name(&self, container: &str) -> String {
        format!(
            "{}-{}-{}",
            self.kind.as_str().to_lowercase(),
            self.name,
            container
        )
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_owner_triple() {
        let owner = WorkloadRef::new("ReplicaSet", "ns", "app-rs");
        let parsed = WorkloadRef::from_labels(&owner.labels()).unwrap();
        assert_eq!(parsed, owner);
        assert_eq!(parsed.kind, WorkloadKind::ReplicaSet);
    }

    #[test]
    fn missing_label_is_reported_by_key() {
        let mut labels = WorkloadRef::new("Pod", "ns", "web").labels();
        labels.remove(LABEL_RESOURCE_NAME);
        let err = WorkloadRef::from_labels(&labels).unwrap_err();
        assert!(matches!(err, ModelError::MissingLabel(LABEL_RESOURCE_NAME)));
    }

    #[test]
    fn report_name_lowercases_kind() {
        let owner = WorkloadRef::new("ReplicaSet", "ns", "app-rs");
        assert_eq!(owner.report_name("web"), "replicaset-app-rs-web");
    }

    #[test]
    fn unknown_kinds_are_preserved() {
        let kind = WorkloadKind::from("Rollout");
        assert_eq!(kind, WorkloadKind::Other("Rollout".into()));
        assert_eq!(kind.to_string(), "Rollout");
    }
}
