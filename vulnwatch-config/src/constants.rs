//! Environment variable names and built-in defaults.

pub const ENV_NAMESPACE: &str = "OPERATOR_NAMESPACE";
pub const ENV_TARGET_NAMESPACES: &str = "OPERATOR_TARGET_NAMESPACES";
pub const ENV_SERVICE_ACCOUNT: &str = "OPERATOR_SERVICE_ACCOUNT";
pub const ENV_SCAN_JOB_TIMEOUT: &str = "OPERATOR_SCAN_JOB_TIMEOUT";
pub const ENV_SCANNER_IMAGE: &str = "OPERATOR_SCANNER_IMAGE";
pub const ENV_HEALTH_BIND_ADDRESS: &str = "OPERATOR_HEALTH_BIND_ADDRESS";
pub const ENV_CONFIG_PATH: &str = "OPERATOR_CONFIG_PATH";

pub const DEFAULT_SERVICE_ACCOUNT: &str = "vulnwatch-operator";
pub const DEFAULT_SCAN_JOB_TIMEOUT: &str = "5m";
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:9090";

/// Below this a scan job rarely gets past downloading the vulnerability
/// database.
pub const MIN_RECOMMENDED_TIMEOUT_SECS: u64 = 30;
