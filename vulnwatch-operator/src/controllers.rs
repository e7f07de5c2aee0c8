//! Wires the core reconcilers onto kube-runtime controllers.

use std::{sync::Arc, time::Duration};

use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, Shared},
};
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use kube::{
    Api, Client,
    runtime::{Controller, controller::Action, watcher},
};
use tracing::{debug, info, warn};
use vulnwatch_config::OperatorConfig;
use vulnwatch_core::{
    CompletionProcessor, JobReconciler, KubeCluster, ObjectKey, PodReconciler, ReportStore,
    ScanError, ScanTaskManager, TrivyScanner, VulnerabilityScanner,
};
use vulnwatch_model::labels::{LABEL_MANAGED_BY, MANAGED_BY_OPERATOR};

use crate::health::Readiness;

/// Resolves once the process is asked to stop; cloned into every task.
pub type Shutdown = Shared<BoxFuture<'static, ()>>;

const RETRY_AFTER: Duration = Duration::from_secs(15);

pub struct Context {
    pods: PodReconciler,
    jobs: JobReconciler,
}

impl Context {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        let cluster = Arc::new(KubeCluster::new(client));
        let scanner: Arc<dyn VulnerabilityScanner> =
            Arc::new(TrivyScanner::new(config.scanner_image.clone()));
        let store = ReportStore::new(cluster.clone());

        let tasks = ScanTaskManager::new(cluster.clone(), scanner.clone(), config.task_options());
        let pods = PodReconciler::new(
            cluster.clone(),
            config.admission_filter(),
            store.clone(),
            tasks,
        );
        let processor = CompletionProcessor::new(cluster.clone(), cluster.clone(), scanner, store);
        let jobs = JobReconciler::new(cluster, config.operator_namespace.clone(), processor);

        Self { pods, jobs }
    }
}

async fn reconcile_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action, ScanError> {
    let Some(key) = ObjectKey::of(pod.as_ref()) else {
        return Ok(Action::await_change());
    };
    ctx.pods.reconcile(&key).await?;
    Ok(Action::await_change())
}

async fn reconcile_job(job: Arc<Job>, ctx: Arc<Context>) -> Result<Action, ScanError> {
    let Some(key) = ObjectKey::of(job.as_ref()) else {
        return Ok(Action::await_change());
    };
    ctx.jobs.reconcile(&key).await?;
    Ok(Action::await_change())
}

/// Transport failures are redelivered; malformed input is not.
fn error_policy<K>(_object: Arc<K>, err: &ScanError, _ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(error = %err, retry_in = ?RETRY_AFTER, "reconciliation failed");
        Action::requeue(RETRY_AFTER)
    } else {
        warn!(error = %err, "reconciliation failed permanently");
        Action::await_change()
    }
}

/// Runs the pod controllers (one per target namespace, or a single
/// cluster-wide one) and the scan job controller until `shutdown` fires.
pub async fn run(client: Client, config: &OperatorConfig, readiness: Readiness, shutdown: Shutdown) {
    let ctx = Arc::new(Context::new(client.clone(), config));
    let mut controllers: Vec<BoxFuture<'static, ()>> = Vec::new();

    let pod_apis: Vec<Api<Pod>> = match config.watched_namespaces() {
        None => vec![Api::all(client.clone())],
        Some(namespaces) => namespaces
            .iter()
            .map(|namespace| Api::namespaced(client.clone(), namespace))
            .collect(),
    };
    for api in pod_apis {
        controllers.push(
            Controller::new(api, watcher::Config::default())
                .graceful_shutdown_on(shutdown.clone())
                .run(reconcile_pod, error_policy, ctx.clone())
                .for_each(|result| async move {
                    match result {
                        Ok((pod, _)) => {
                            debug!(pod = %pod.name, namespace = ?pod.namespace, "pod reconciled")
                        }
                        Err(err) => warn!(error = %err, "pod controller error"),
                    }
                })
                .boxed(),
        );
    }

    let jobs: Api<Job> = Api::namespaced(client, &config.operator_namespace);
    let managed = format!("{LABEL_MANAGED_BY}={MANAGED_BY_OPERATOR}");
    controllers.push(
        Controller::new(jobs, watcher::Config::default().labels(&managed))
            .graceful_shutdown_on(shutdown.clone())
            .run(reconcile_job, error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((job, _)) => debug!(job = %job.name, "scan job reconciled"),
                    Err(err) => warn!(error = %err, "scan job controller error"),
                }
            })
            .boxed(),
    );

    info!(
        controllers = controllers.len(),
        install_mode = %config.install_mode(),
        "controllers started"
    );
    readiness.mark_ready();

    futures::future::join_all(controllers).await;
    info!("controllers stopped");
}

/// Completes on ctrl-c or SIGTERM.
pub fn shutdown_signal() -> Shutdown {
    async {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        info!("shutdown requested");
    }
    .boxed()
    .shared()
}
