//! Core data model definitions shared across vulnwatch crates.
#![allow(missing_docs)]

pub mod error;
pub mod images;
pub mod labels;
pub mod report;
pub mod workload;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use images::ContainerImages;
pub use report::{
    Artifact, Registry, ScannerInfo, Severity, Vulnerability,
    VulnerabilityReport, VulnerabilityReportSpec, VulnerabilityScanResult,
    VulnerabilitySummary,
};
pub use workload::{WorkloadKind, WorkloadRef};
