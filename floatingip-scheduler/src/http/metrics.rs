use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};

use axum::{
    Router,
    extract::State as AxumState,
    response::{IntoResponse, Response},
    routing::get,
};
use http::{StatusCode, header};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Endpoint state. `caches_synced` is cancelled once the controller's pod and
/// ConfigMap reflectors have their first full listing.
#[derive(Clone)]
pub(crate) struct State {
    caches_synced: CancellationToken,
}

impl State {
    pub fn new(caches_synced: CancellationToken) -> Self {
        Self { caches_synced }
    }

    pub fn readiness(&self) -> Readiness {
        if self.caches_synced.is_cancelled() {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    pub fn exposition(&self) -> Exposition {
        let mut buffer = String::new();
        let registry = crate::metrics::REGISTRY
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match prometheus_client::encoding::text::encode(&mut buffer, &registry) {
            Ok(()) => Exposition::Encoded(buffer),
            Err(e) => {
                warn!(%e, "failed to encode metrics");
                Exposition::Failed
            }
        }
    }
}

pub(crate) async fn serve(
    addr: SocketAddr,
    state: Arc<State>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "serving metrics, readyz and livez");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

pub(crate) fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/readyz", get(readyz))
        .route("/livez", get(|| async { "Ok" }))
        .with_state(state)
}

async fn metrics(AxumState(state): AxumState<Arc<State>>) -> Exposition {
    state.exposition()
}

async fn readyz(AxumState(state): AxumState<Arc<State>>) -> Readiness {
    state.readiness()
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Exposition {
    Encoded(String),
    Failed,
}

impl IntoResponse for Exposition {
    fn into_response(self) -> Response {
        match self {
            Exposition::Encoded(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
                body,
            )
                .into_response(),
            Exposition::Failed => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    NotReady,
}

impl IntoResponse for Readiness {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Readiness::Ready => (StatusCode::OK, "Ok"),
            Readiness::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "caches not synced"),
        };
        (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
    }
}
