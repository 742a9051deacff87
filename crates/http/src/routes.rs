//! Update protocol handlers and router assembly.

use crate::error::ApiError;
use crate::middleware::{
    TransformConfig, TransformState, decrypt_body, gzip_codec, ip_allowlist, verify_and_sign,
};
use crate::render::render_listing;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metricsd_app::{MetricsDeps, PathUpdate};
use metricsd_ports::MetricRecord;
use metricsd_shared::{ErrorEnvelope, RequestContext};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceBuilder;

/// Handler state.
#[derive(Clone)]
pub struct HttpState {
    /// Use case dependencies.
    pub deps: MetricsDeps,
    /// Process root context; requests derive children sharing cancellation.
    pub root: RequestContext,
}

type AppState = Arc<HttpState>;
type HandlerResult = Result<Response, ApiError>;

/// Build the full router with the transform chain applied.
pub fn build_router(state: HttpState, transforms: TransformConfig) -> Router {
    let transforms: TransformState = Arc::new(transforms);
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
        .with_state(Arc::new(state))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(transforms.clone(), ip_allowlist))
                .layer(from_fn_with_state(transforms.clone(), decrypt_body))
                .layer(from_fn_with_state(transforms, verify_and_sign))
                .layer(from_fn(gzip_codec)),
        )
}

fn request_ctx(state: &HttpState) -> RequestContext {
    state.root.child("req_")
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|error| ApiError(ErrorEnvelope::invalid_input(format!("invalid JSON: {error}"))))
}

fn json<T: Serialize>(value: &T) -> HandlerResult {
    let body = serde_json::to_vec(value).map_err(|error| {
        ApiError(ErrorEnvelope::invalid_input(format!("failed to encode response: {error}")))
    })?;
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response())
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> HandlerResult {
    let ctx = request_ctx(&state);
    metricsd_app::update_from_path(
        &ctx,
        &state.deps,
        PathUpdate {
            kind: &kind,
            name: &name,
            value: &value,
        },
    )
    .await?;
    Ok(StatusCode::OK.into_response())
}

async fn update_json(State(state): State<AppState>, body: Bytes) -> HandlerResult {
    let ctx = request_ctx(&state);
    let record: MetricRecord = decode(&body)?;
    let updated = metricsd_app::update_metric(&ctx, &state.deps, record).await?;
    json(&updated)
}

async fn update_batch(State(state): State<AppState>, body: Bytes) -> HandlerResult {
    let ctx = request_ctx(&state);
    let records: Vec<MetricRecord> = decode(&body)?;
    let updated = metricsd_app::update_metrics(&ctx, &state.deps, records).await?;
    json(&updated)
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> HandlerResult {
    let value = metricsd_app::get_value(&state.deps, &kind, &name)?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        value.to_string(),
    )
        .into_response())
}

async fn value_json(State(state): State<AppState>, body: Bytes) -> HandlerResult {
    let query: MetricRecord = decode(&body)?;
    let record = metricsd_app::get_record(&state.deps, &query)?;
    json(&record)
}

async fn ping(State(state): State<AppState>) -> Response {
    let ctx = request_ctx(&state);
    match metricsd_app::ping(&ctx, &state.deps).await {
        Ok(()) => (StatusCode::OK, "pong").into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.message).into_response(),
    }
}

async fn index(State(state): State<AppState>) -> Response {
    let listing = metricsd_app::list_metrics(&state.deps);
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/html; charset=utf-8")],
        render_listing(&listing),
    )
        .into_response()
}
