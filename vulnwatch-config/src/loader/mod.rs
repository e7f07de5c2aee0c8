pub mod error;

use std::{
    fmt, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, info};
use vulnwatch_core::scanner::trivy::DEFAULT_TRIVY_IMAGE;

use crate::constants::{
    DEFAULT_HEALTH_BIND_ADDRESS, DEFAULT_SCAN_JOB_TIMEOUT, DEFAULT_SERVICE_ACCOUNT, ENV_NAMESPACE,
    MIN_RECOMMENDED_TIMEOUT_SECS,
};
use crate::models::{
    ConfigMetadata, OperatorConfig,
    sources::{ConfigOverrides, EnvConfig, FileConfig},
};
use error::ConfigLoadError;

/// Non-fatal findings about an otherwise valid configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    ShortScanTimeout(Duration),
    OperatorNamespaceTargeted,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::ShortScanTimeout(timeout) => write!(
                f,
                "scan job timeout of {} is likely too short for the scanner to finish",
                humantime::format_duration(*timeout)
            ),
            ConfigWarning::OperatorNamespaceTargeted => write!(
                f,
                "operator namespace is listed among several target namespaces; its pods will be scanned"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: OperatorConfig,
    pub warnings: Vec<ConfigWarning>,
}

/// Resolves operator settings from, in increasing precedence: built-in
/// defaults, an optional config file, environment variables and explicit
/// overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    load_dotenv: bool,
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `.env` from the working directory before gathering env vars.
    pub fn with_dotenv(mut self, enabled: bool) -> Self {
        self.load_dotenv = enabled;
        self
    }

    /// Config file to use instead of `OPERATOR_CONFIG_PATH`.
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file = if self.load_dotenv {
            match dotenvy::dotenv() {
                Ok(path) => Some(path),
                Err(err) if err.not_found() => None,
                Err(err) => return Err(err.into()),
            }
        } else {
            None
        };

        let mut load = self.load_with(EnvConfig::gather())?;
        load.config.metadata.env_file = env_file;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] but with an explicit environment.
    pub fn load_with(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let config_path = self.config_path.clone().or_else(|| env.config_path.clone());
        let file = match config_path.as_deref() {
            Some(path) => {
                info!(path = %path.display(), "loading operator config file");
                load_file(path)?
            }
            None => FileConfig::default(),
        };
        let overrides = &self.overrides;

        let operator_namespace = overrides
            .namespace
            .clone()
            .or(env.namespace)
            .or(file.namespace)
            .ok_or(ConfigLoadError::MissingNamespace(ENV_NAMESPACE))?;

        let mut target_namespaces = overrides
            .target_namespaces
            .clone()
            .or(env.target_namespaces)
            .or(file.target_namespaces)
            .unwrap_or_default();
        target_namespaces.retain(|ns| !ns.trim().is_empty());
        target_namespaces.sort();
        target_namespaces.dedup();

        let service_account = overrides
            .service_account
            .clone()
            .or(env.service_account)
            .or(file.service_account)
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());

        let raw_timeout = overrides
            .scan_job_timeout
            .clone()
            .or(env.scan_job_timeout)
            .or(file.scan_job.timeout)
            .unwrap_or_else(|| DEFAULT_SCAN_JOB_TIMEOUT.to_string());
        let scan_job_timeout = parse_timeout(&raw_timeout)?;

        let scanner_image = overrides
            .scanner_image
            .clone()
            .or(env.scanner_image)
            .or(file.scan_job.scanner_image)
            .unwrap_or_else(|| DEFAULT_TRIVY_IMAGE.to_string());

        let raw_address = overrides
            .health_bind_address
            .clone()
            .or(env.health_bind_address)
            .or(file.health.bind_address)
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());
        let health_bind_address = raw_address.parse::<SocketAddr>().map_err(|source| {
            ConfigLoadError::InvalidBindAddress {
                value: raw_address.clone(),
                source,
            }
        })?;

        let config = OperatorConfig {
            operator_namespace,
            target_namespaces,
            service_account,
            scan_job_timeout,
            scanner_image,
            health_bind_address,
            metadata: ConfigMetadata {
                config_path,
                env_file: None,
            },
        };
        let warnings = collect_warnings(&config);
        debug!(
            namespace = %config.operator_namespace,
            install_mode = %config.install_mode(),
            warnings = warnings.len(),
            "operator config resolved"
        );

        Ok(ConfigLoad { config, warnings })
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigLoadError> {
    let timeout = humantime::parse_duration(raw).map_err(|source| {
        ConfigLoadError::InvalidTimeout {
            value: raw.to_string(),
            source,
        }
    })?;
    if timeout.as_secs() == 0 {
        return Err(ConfigLoadError::ZeroTimeout);
    }
    Ok(timeout)
}

fn collect_warnings(config: &OperatorConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    if config.scan_job_timeout.as_secs() < MIN_RECOMMENDED_TIMEOUT_SECS {
        warnings.push(ConfigWarning::ShortScanTimeout(config.scan_job_timeout));
    }
    if config.target_namespaces.len() > 1
        && config
            .target_namespaces
            .iter()
            .any(|ns| ns == &config.operator_namespace)
    {
        warnings.push(ConfigWarning::OperatorNamespaceTargeted);
    }
    warnings
}

/// Parses by extension; anything else is tried as TOML, then JSON.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |message: String| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents).map_err(|err| parse_error(err.to_string())),
        Some("toml") | Some("tml") => {
            toml::from_str(&contents).map_err(|err| parse_error(err.to_string()))
        }
        _ => toml::from_str(&contents).or_else(|toml_err| {
            serde_json::from_str(&contents).map_err(|json_err| {
                parse_error(format!("toml error: {toml_err}; json error: {json_err}"))
            })
        }),
    }
}
