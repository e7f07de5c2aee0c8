//! Liveness and readiness probes.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use tracing::info;

/// Flipped once every controller is running.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

pub async fn serve<F>(address: SocketAddr, readiness: Readiness, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind health endpoint on {address}"))?;
    info!(%address, "health endpoint listening");

    axum::serve(listener, router(readiness))
        .with_graceful_shutdown(shutdown)
        .await
        .context("health endpoint failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_follows_controller_start() {
        let readiness = Readiness::default();
        assert_eq!(
            readyz(State(readiness.clone())).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        readiness.mark_ready();
        assert_eq!(readyz(State(readiness)).await, (StatusCode::OK, "ready"));
    }

    #[tokio::test]
    async fn liveness_is_unconditional() {
        assert_eq!(healthz().await, "ok");
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            Readiness::default(),
            async move {
                let _ = stopped.await;
            },
        ));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
