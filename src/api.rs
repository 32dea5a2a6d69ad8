use axum::{
    extract::{rejection::QueryRejection, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, value::RawValue};
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::QueryError;
use crate::models::{Stats, TransferEvent};
use crate::query::{EventQuery, QueryService};

/// `totalValue` can exceed any native integer, so it is emitted as a raw JSON number.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    total_events: u64,
    total_value: Box<RawValue>,
}

impl TryFrom<Stats> for StatsResponse {
    type Error = serde_json::Error;

    fn try_from(stats: Stats) -> Result<Self, Self::Error> {
        Ok(Self {
            total_events: stats.total_events,
            total_value: RawValue::from_string(stats.total_value.to_string())?,
        })
    }
}

pub struct ApiError(StatusCode, String);

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidParams(msg) => ApiError(StatusCode::BAD_REQUEST, msg),
            QueryError::Store(e) => {
                error!("Query failed: {:?}", e);
                ApiError(StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

pub fn router(service: QueryService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Transfer Indexer API running" }))
        .route("/events", get({
            let service = service.clone();
            move |q: Result<Query<EventQuery>, QueryRejection>| {
                let service = service.clone();
                async move {
                    let Query(params) = q.map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.body_text()))?;
                    get_events(service, params).await
                }
            }
        }))
        .route("/stats", get({
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { get_stats(service).await }
            }
        }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn serve(
    port: u16,
    service: QueryService,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    let app = router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}

async fn get_events(
    service: QueryService,
    query: EventQuery,
) -> Result<Json<Vec<TransferEvent>>, ApiError> {
    Ok(Json(service.events(query).await?))
}

async fn get_stats(service: QueryService) -> Result<Json<StatsResponse>, ApiError> {
    let stats = service.stats().await?;
    let body = StatsResponse::try_from(stats).map_err(|e| {
        error!("Stats encoding failed: {:?}", e);
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
    })?;
    Ok(Json(body))
}
