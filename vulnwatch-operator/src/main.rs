//! vulnwatch operator entry point.

mod controllers;
mod health;
mod telemetry;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing::{info, warn};
use vulnwatch_config::{ConfigLoad, ConfigLoader, ConfigOverrides};
use vulnwatch_model::VulnerabilityReport;

use telemetry::LogFormat;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vulnwatch-operator", version)]
#[command(about = "Scans workload container images and records vulnerability reports")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (TOML or JSON)
    #[arg(long, env = "OPERATOR_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Namespace the operator and its scan jobs run in (overrides config)
    #[arg(long)]
    namespace: Option<String>,

    /// Comma separated namespaces to scan; omit for all namespaces
    #[arg(long, value_delimiter = ',')]
    target_namespaces: Option<Vec<String>>,

    /// Service account scan jobs run as (overrides config)
    #[arg(long)]
    service_account: Option<String>,

    /// Scan job deadline, e.g. `5m` (overrides config)
    #[arg(long)]
    scan_job_timeout: Option<String>,

    /// Scanner container image (overrides config)
    #[arg(long)]
    scanner_image: Option<String>,

    /// Address for /healthz and /readyz (overrides config)
    #[arg(long)]
    health_bind_address: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Skip reading `.env` from the working directory
    #[arg(long)]
    no_dotenv: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the VulnerabilityReport CustomResourceDefinition as JSON and exit
    Crd,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            namespace: self.namespace.clone(),
            target_namespaces: self.target_namespaces.clone(),
            service_account: self.service_account.clone(),
            scan_job_timeout: self.scan_job_timeout.clone(),
            scanner_image: self.scanner_image.clone(),
            health_bind_address: self.health_bind_address.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Crd) = cli.command {
        let crd = serde_json::to_string_pretty(&VulnerabilityReport::crd())
            .context("failed to render CRD")?;
        println!("{crd}");
        return Ok(());
    }

    telemetry::init(cli.log_format);

    let ConfigLoad { config, warnings } = ConfigLoader::new()
        .with_dotenv(!cli.no_dotenv)
        .with_config_path(cli.config.clone())
        .with_overrides(cli.overrides())
        .load()
        .context("failed to load configuration")?;

    if let Some(path) = &config.metadata.env_file {
        info!(path = %path.display(), "loaded .env file");
    }
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }
    info!(
        namespace = %config.operator_namespace,
        install_mode = %config.install_mode(),
        targets = ?config.target_namespaces,
        scanner_image = %config.scanner_image,
        scan_job_timeout = ?config.scan_job_timeout,
        "operator configuration in effect"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let readiness = health::Readiness::default();
    let shutdown = controllers::shutdown_signal();
    let health = tokio::spawn(health::serve(
        config.health_bind_address,
        readiness.clone(),
        shutdown.clone(),
    ));

    controllers::run(client, &config, readiness, shutdown).await;

    health.await.context("health endpoint task panicked")??;
    info!("operator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::parse_from([
            "vulnwatch-operator",
            "--namespace",
            "vulnwatch",
            "--target-namespaces",
            "apps,batch",
            "--service-account",
            "scanner",
            "--log-format",
            "json",
        ]);

        let overrides = cli.overrides();
        assert_eq!(overrides.namespace.as_deref(), Some("vulnwatch"));
        assert_eq!(
            overrides.target_namespaces,
            Some(vec!["apps".to_string(), "batch".to_string()])
        );
        assert_eq!(overrides.service_account.as_deref(), Some("scanner"));
        assert_eq!(overrides.scan_job_timeout, None);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn crd_subcommand_parses() {
        let cli = Cli::parse_from(["vulnwatch-operator", "crd"]);
        assert!(matches!(cli.command, Some(Command::Crd)));
    }

    #[test]
    fn crd_names_the_report_kind() {
        let crd = VulnerabilityReport::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("vulnerabilityreports.vulnwatch.dev")
        );
        assert_eq!(crd.spec.names.kind, "VulnerabilityReport");
    }
}
