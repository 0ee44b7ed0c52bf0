use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::Instrument;
use uuid::Uuid;

use super::error::ApiResult;
use super::AppState;
use crate::catalog::{build_catalog, CatalogSummary};
use crate::extractors::ExtractorMetadata;
use crate::gate::Route;
use crate::platform::{classify, Classification};
use crate::selector::select;
use crate::utils::validate_url;
use crate::GatewayError;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub url: String,
    pub format_id: String,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn analyze(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<CatalogSummary>> {
    state
        .gate
        .admit(Route::Analyze, &headers, peer.map(|ConnectInfo(addr)| addr))
        .await?;

    let Json(request) = payload.map_err(invalid_body)?;
    let (url, classification) = admit_url(&state, &request.url)?;

    let metadata = extract(&state, &url, "Invalid URL or extraction failed").await?;
    let catalog = build_catalog(&metadata);

    tracing::info!(
        platform = %classification.platform,
        formats = catalog.encodings.len(),
        "Analyzed {}",
        url
    );

    Ok(Json(catalog.summary()))
}

pub async fn stream(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<StreamRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let admission = state
        .gate
        .admit(Route::Stream, &headers, peer.map(|ConnectInfo(addr)| addr))
        .await?;

    let Json(request) = payload.map_err(invalid_body)?;
    let format_id = request.format_id.trim();
    if format_id.is_empty() {
        return Err(GatewayError::InvalidInput(
            "format_id must not be empty".to_string(),
        ));
    }

    let (url, classification) = admit_url(&state, &request.url)?;

    let span = tracing::info_span!(
        "stream",
        request_id = %Uuid::new_v4(),
        caller = %admission.rate_key,
        platform = %classification.platform,
    );

    async move {
        let metadata = extract(&state, &url, "Invalid URL").await?;
        let plan = select(classification.platform, format_id)
            .with_title(metadata.title.as_deref());

        tracing::info!(
            selection = %plan.selection_expression,
            filename = %plan.target_filename,
            "Starting stream for {}",
            url
        );

        let media = state.runner.run(&plan, &url)?;

        let disposition = format!("attachment; filename=\"{}\"", plan.target_filename);
        let disposition = HeaderValue::from_str(&disposition)
            .map_err(|e| GatewayError::PipelineAborted(e.to_string()))?;

        Ok((
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(plan.output_container.mime_type()),
                ),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            Body::from_stream(media),
        )
            .into_response())
    }
    .instrument(span)
    .await
}

fn invalid_body(rejection: JsonRejection) -> GatewayError {
    tracing::debug!("Rejected request body: {}", rejection);
    GatewayError::InvalidInput(format!("Invalid request body: {}", rejection.body_text()))
}

/// Validate the URL and apply the domain allowlist
fn admit_url(state: &AppState, raw: &str) -> ApiResult<(String, Classification)> {
    let url = validate_url(raw)
        .map_err(|e| GatewayError::InvalidInput(e.to_string()))?
        .to_string();

    let classification = classify(&url);
    if state.enforce_allowlist && !classification.allowed {
        tracing::info!("Rejected URL outside the allowlist: {}", url);
        return Err(GatewayError::DomainRejected);
    }

    Ok((url, classification))
}

async fn extract(state: &AppState, url: &str, detail: &str) -> ApiResult<ExtractorMetadata> {
    state.extractor.extract(url).await.map_err(|e| {
        tracing::warn!(extractor = state.extractor.name(), "Extraction failed for {}: {:#}", url, e);
        GatewayError::ExtractionFailed(detail.to_string())
    })
}
