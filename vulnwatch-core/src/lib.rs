//! # vulnwatch core
//!
//! Reconciliation and deduplication protocol of the vulnwatch operator.
//!
//! ## Overview
//!
//! Pods are watched; each workload gets at most one scan job per distinct set
//! of container images, and each finished scan job is harvested into
//! `VulnerabilityReport` objects exactly once per workload container. Change
//! notifications arrive at least once, unordered, and possibly concurrently,
//! so every step is an existence check followed by an idempotent create.
//!
//! ## Architecture
//!
//! - [`admission`]: which pods are eligible for scanning
//! - [`resolver`]: owning workload and container images of pods and jobs
//! - [`reports`]: report reads, coverage checks and idempotent writes
//! - [`tasks`]: scan job creation, one per workload
//! - [`completion`]: harvesting and disposal of finished scan jobs
//! - [`reconcile`]: the pod and job entry points
//! - [`cluster`]: ports onto the resource store, with Kubernetes and
//!   in-memory adapters
//! - [`scanner`]: the scanner capability and its Trivy implementation

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod admission;
pub mod cluster;
pub mod completion;
pub mod error;
pub mod reconcile;
pub mod reports;
pub mod resolver;
pub mod scanner;
pub mod tasks;

pub use admission::{Admission, AdmissionFilter, InstallMode, SkipReason};
pub use cluster::{
    ClusterStore, CreateOutcome, InMemoryCluster, KubeCluster, LogStream,
    LogsReader, ObjectKey,
};
pub use completion::{CompletionOutcome, CompletionProcessor, TaskCondition};
pub use error::{Result, ScanError};
pub use reconcile::{JobOutcome, JobReconciler, PodOutcome, PodReconciler};
pub use reports::{ReportStore, WorkloadVulnerabilities, WriteOutcome, WriteSummary};
pub use scanner::{TrivyScanner, VulnerabilityScanner};
pub use tasks::{EnsureOutcome, ScanTaskManager, TaskOptions};
