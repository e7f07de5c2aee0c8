pub mod sources;

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use vulnwatch_core::{AdmissionFilter, InstallMode, TaskOptions};

/// Fully resolved operator settings.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator runs in; scan jobs are created here too.
    pub operator_namespace: String,
    /// Namespaces whose pods are scanned. Empty means every namespace.
    pub target_namespaces: Vec<String>,
    pub service_account: String,
    pub scan_job_timeout: Duration,
    pub scanner_image: String,
    pub health_bind_address: SocketAddr,
    pub metadata: ConfigMetadata,
}

impl OperatorConfig {
    pub fn install_mode(&self) -> InstallMode {
        InstallMode::derive(&self.operator_namespace, &self.target_namespaces)
    }

    pub fn admission_filter(&self) -> AdmissionFilter {
        AdmissionFilter::new(
            self.operator_namespace.clone(),
            self.target_namespaces.clone(),
        )
    }

    pub fn task_options(&self) -> TaskOptions {
        TaskOptions {
            namespace: self.operator_namespace.clone(),
            service_account: self.service_account.clone(),
            timeout: self.scan_job_timeout,
        }
    }

    /// Namespaces to watch pods in, or `None` for a cluster-wide watch.
    pub fn watched_namespaces(&self) -> Option<&[String]> {
        match self.install_mode() {
            InstallMode::AllNamespaces => None,
            _ => Some(&self.target_namespaces),
        }
    }
}

/// Where the loaded values came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}
