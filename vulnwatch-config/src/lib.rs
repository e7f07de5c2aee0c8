//! Configuration loading for the vulnwatch operator.
//!
//! Settings come from built-in defaults, an optional TOML or JSON file,
//! `OPERATOR_*` environment variables (optionally seeded from `.env`) and
//! command line overrides, in increasing order of precedence. The resolved
//! [`OperatorConfig`] hands the core crate its admission filter and scan job
//! options.

#![allow(missing_docs)]

pub mod constants;
pub mod loader;
pub mod models;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, ConfigWarning, error::ConfigLoadError};
pub use models::sources::{ConfigOverrides, EnvConfig, FileConfig};
pub use models::{ConfigMetadata, OperatorConfig};
