use crate::config::Config;
use crate::dedup::{Deduplicator, RequestId};
use crate::error::ApiError;
use crate::notify::{DispatchWorkers, HttpNotifier, NotificationDispatcher, Notifier};
use crate::window::WindowScheduler;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub dedup: Arc<Deduplicator>,
    pub dispatcher: NotificationDispatcher,
}

impl AppState {
    /// Builds state around `notifier` and starts its worker pool.
    pub fn new(notifier: Arc<dyn Notifier>, config: &Config) -> (Self, DispatchWorkers) {
        let (dispatcher, workers) = NotificationDispatcher::spawn(
            notifier,
            config.notify_workers,
            config.notify_queue_capacity,
        );
        let state = Self {
            dedup: Arc::new(Deduplicator::new()),
            dispatcher,
        };
        (state, workers)
    }
}

#[derive(Debug, Deserialize)]
pub struct AcceptParams {
    pub id: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub status_code: u16,
    pub message: String,
}

pub async fn run_server(config: Config) -> Result<()> {
    let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::new(
        config.notify_method,
        config.notify_timeout,
    )?);
    let (state, workers) = AppState::new(notifier, &config);
    let scheduler = WindowScheduler::new(state.dedup.clone(), config.window).spawn();

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    workers.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/accept", get(handle_accept))
        .route("/api/verve/accept", get(handle_accept))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong!" }))
}

async fn handle_accept(
    State(state): State<AppState>,
    params: Result<Query<AcceptParams>, QueryRejection>,
) -> Result<Json<StatusBody>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidQuery(e.body_text()))?;
    let id = parse_id(params.id.as_deref())?;
    let endpoint = params.endpoint.filter(|e| !e.is_empty());

    info!(id, endpoint = endpoint.as_deref().unwrap_or(""), "Received accept");

    let accepted = state.dedup.accept(id).await;
    if accepted.is_new {
        info!(unique_request_count = accepted.count, "Unique request count increased");
    }

    if let Some(endpoint) = endpoint {
        let count = state.dedup.snapshot().await;
        state.dispatcher.notify(endpoint, count);
    }

    Ok(Json(StatusBody {
        status_code: 200,
        message: "OK, Done!".to_string(),
    }))
}

fn parse_id(raw: Option<&str>) -> Result<RequestId, ApiError> {
    match raw {
        None | Some("") => Err(ApiError::MissingId),
        Some(s) => s
            .parse::<RequestId>()
            .map_err(|_| ApiError::InvalidId(s.to_string())),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_non_negative_integers() {
        assert_eq!(parse_id(Some("42")).unwrap(), 42);
        assert_eq!(parse_id(Some("0")).unwrap(), 0);
    }

    #[test]
    fn parse_id_rejects_missing_and_malformed() {
        assert!(matches!(parse_id(None), Err(ApiError::MissingId)));
        assert!(matches!(parse_id(Some("")), Err(ApiError::MissingId)));
        assert!(matches!(parse_id(Some("abc")), Err(ApiError::InvalidId(_))));
        assert!(matches!(parse_id(Some("-3")), Err(ApiError::InvalidId(_))));
        assert!(matches!(parse_id(Some("4.2")), Err(ApiError::InvalidId(_))));
    }
}
