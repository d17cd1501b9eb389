use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use iw_core::ConceptGraph;
use iw_engine::analysis::{AnalysisError, AnalysisSource};

use super::{api_error, parse_body};
use crate::auth::AuthContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeRequest {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    summary: String,
    graph_data: ConceptGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<String>,
    cached: bool,
    source: AnalysisSource,
}

/// POST /api/analyze: summary plus concept graph for a piece of content.
pub(crate) async fn analyze(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let request = match parse_body(payload) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let content = request.content.unwrap_or_default();

    match state.engine.analyze(&content, &auth.user_id).await {
        Ok(outcome) => {
            let mut response = Json(AnalyzeResponse {
                summary: outcome.result.summary,
                graph_data: outcome.result.concept_graph,
                notice: outcome.notice,
                cached: outcome.cached,
                source: outcome.source,
            })
            .into_response();
            if let Some(remaining) = outcome.remaining {
                append_rate_limit_headers(
                    response.headers_mut(),
                    state.engine.limiter.max_requests(),
                    remaining,
                );
            }
            response
        }
        Err(err) => analysis_error_response(err),
    }
}

fn analysis_error_response(err: AnalysisError) -> Response {
    match err {
        AnalysisError::InvalidContent => {
            api_error(StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        AnalysisError::ContentTooLarge { .. } => {
            api_error(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response()
        }
        AnalysisError::RateLimited {
            retry_after_secs,
            gate,
        } => {
            let body = json!({
                "error": err.to_string(),
                "retryAfter": retry_after_secs,
                "gate": gate,
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}

fn append_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
}
