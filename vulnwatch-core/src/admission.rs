//! Decides whether an observed pod is eligible for scanning.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use vulnwatch_model::labels::{LABEL_MANAGED_BY, MANAGED_BY_OPERATOR};

/// How the operator was installed, derived from the operator namespace and
/// the configured target namespaces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum InstallMode {
    /// Watches only the namespace it runs in.
    OwnNamespace,
    /// Watches one namespace other than its own.
    SingleNamespace,
    /// Watches several namespaces.
    MultiNamespace,
    /// Watches the whole cluster.
    AllNamespaces,
}

impl InstallMode {
    pub fn derive(operator_namespace: &str, target_namespaces: &[String]) -> Self {
        match target_namespaces {
            [] => InstallMode::AllNamespaces,
            [only] if only == operator_namespace => InstallMode::OwnNamespace,
            [_] => InstallMode::SingleNamespace,
            _ => InstallMode::MultiNamespace,
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::OwnNamespace => write!(f, "OwnNamespace"),
            InstallMode::SingleNamespace => write!(f, "SingleNamespace"),
            InstallMode::MultiNamespace => write!(f, "MultiNamespace"),
            InstallMode::AllNamespaces => write!(f, "AllNamespaces"),
        }
    }
}

/// Why a pod was not admitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    OperatorNamespace,
    ManagedByOperator,
    Terminating,
    ContainersNotReady,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OperatorNamespace => {
                write!(f, "pod runs in the operator namespace")
            }
            SkipReason::ManagedByOperator => {
                write!(f, "pod is managed by this operator")
            }
            SkipReason::Terminating => write!(f, "pod is being terminated"),
            SkipReason::ContainersNotReady => {
                write!(f, "pod containers are not ready yet")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Proceed,
    Skip(SkipReason),
}

/// Pure predicate over pod state and static install configuration.
#[derive(Clone, Debug)]
pub struct AdmissionFilter {
    operator_namespace: String,
    target_namespaces: Vec<String>,
    install_mode: InstallMode,
}

impl AdmissionFilter {
    pub fn new(operator_namespace: impl Into<String>, target_namespaces: Vec<String>) -> Self {
        let operator_namespace = operator_namespace.into();
        let install_mode = InstallMode::derive(&operator_namespace, &target_namespaces);
        Self {
            operator_namespace,
            target_namespaces,
            install_mode,
        }
    }

    pub fn install_mode(&self) -> InstallMode {
        self.install_mode
    }

    pub fn operator_namespace(&self) -> &str {
        &self.operator_namespace
    }

    /// Scan jobs run in the operator namespace, so in single and multi
    /// namespace modes it is watched without being a scan target unless it
    /// was listed explicitly.
    pub fn excludes_namespace(&self, namespace: &str) -> bool {
        if namespace != self.operator_namespace {
            return false;
        }
        match self.install_mode {
            InstallMode::SingleNamespace => true,
            InstallMode::MultiNamespace => !self
                .target_namespaces
                .iter()
                .any(|target| target == &self.operator_namespace),
            InstallMode::OwnNamespace | InstallMode::AllNamespaces => false,
        }
    }

    /// Skip conditions in order; the first match wins.
    pub fn admit(&self, pod: &Pod) -> Admission {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if self.excludes_namespace(namespace) {
            return Admission::Skip(SkipReason::OperatorNamespace);
        }
        if is_managed_by_operator(pod) {
            return Admission::Skip(SkipReason::ManagedByOperator);
        }
        if pod.metadata.deletion_timestamp.is_some() {
            return Admission::Skip(SkipReason::Terminating);
        }
        if !has_containers_ready_condition(pod) {
            return Admission::Skip(SkipReason::ContainersNotReady);
        }
        Admission::Proceed
    }
}

/// Pods spawned by this operator's scan jobs carry the managed-by label.
pub fn is_managed_by_operator(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .is_some_and(|value| value == MANAGED_BY_OPERATOR)
}

/// Presence of the `ContainersReady` condition type, regardless of status.
pub fn has_containers_ready_condition(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "ContainersReady")
        })
}
