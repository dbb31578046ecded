use crate::core::refresh::{AddressService, RefreshOutcome};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const ALREADY_PROCESSING: &str = "this address already processed";
const ADDRESS_NOT_SET: &str = "address is not set";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AddressService>,
}

impl ApiState {
    pub fn new(service: AddressService) -> Self {
        Self { service: Arc::new(service) }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/address/{address}", get(address_handler))
        .route("/address/", get(missing_address_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "address api listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn address_handler(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Response {
    let address = address.trim();
    if address.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, ADDRESS_NOT_SET);
    }

    match state.service.lookup(address).await {
        Ok(RefreshOutcome::Cached(bytes)) => (
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Ok(RefreshOutcome::AlreadyProcessing { started_at }) => Json(json!({
            "message": ALREADY_PROCESSING,
            "startProcess": rfc3339(started_at),
        }))
        .into_response(),
        Ok(RefreshOutcome::Fresh(doc)) => Json(doc).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn missing_address_handler() -> Response {
    error_response(StatusCode::BAD_REQUEST, ADDRESS_NOT_SET)
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "err": msg }))).into_response()
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
