use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{
    ENV_CONFIG_PATH, ENV_HEALTH_BIND_ADDRESS, ENV_NAMESPACE, ENV_SCAN_JOB_TIMEOUT,
    ENV_SCANNER_IMAGE, ENV_SERVICE_ACCOUNT, ENV_TARGET_NAMESPACES,
};
use crate::util::{non_empty, parse_csv};

/// Raw configuration as defined in a TOML or JSON file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespaces: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub scan_job: FileScanJobConfig,
    #[serde(default)]
    pub health: FileHealthConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileScanJobConfig {
    /// Humantime duration, e.g. `"5m"` or `"90s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_image: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileHealthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub namespace: Option<String>,
    pub target_namespaces: Option<Vec<String>>,
    pub service_account: Option<String>,
    pub scan_job_timeout: Option<String>,
    pub scanner_image: Option<String>,
    pub health_bind_address: Option<String>,
    pub config_path: Option<PathBuf>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the env view from an arbitrary lookup so callers can supply
    /// variables without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(name));
        Self {
            namespace: var(ENV_NAMESPACE),
            target_namespaces: lookup(ENV_TARGET_NAMESPACES).map(|raw| parse_csv(&raw)),
            service_account: var(ENV_SERVICE_ACCOUNT),
            scan_job_timeout: var(ENV_SCAN_JOB_TIMEOUT),
            scanner_image: var(ENV_SCANNER_IMAGE),
            health_bind_address: var(ENV_HEALTH_BIND_ADDRESS),
            config_path: var(ENV_CONFIG_PATH).map(PathBuf::from),
        }
    }
}

/// Values supplied on the command line; they win over env and file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub namespace: Option<String>,
    pub target_namespaces: Option<Vec<String>>,
    pub service_account: Option<String>,
    pub scan_job_timeout: Option<String>,
    pub scanner_image: Option<String>,
    pub health_bind_address: Option<String>,
}
