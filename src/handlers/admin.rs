use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> AppResult<()> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || !bool::from(token.as_bytes().ct_eq(expected_token.as_bytes())) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/webhook-events
#[derive(Deserialize)]
pub struct WebhookEventsQuery {
    pub processed: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct WebhookEventResponse {
    stripe_event_id: String,
    event_type: String,
    processed: bool,
    processing_error: Option<String>,
    received_at: String,
    processed_at: Option<String>,
}

pub async fn get_webhook_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WebhookEventsQuery>,
) -> AppResult<Json<Vec<WebhookEventResponse>>> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let events = state.payments.list_webhook_events(query.processed, limit)?;

    let response = events
        .into_iter()
        .map(|e| WebhookEventResponse {
            stripe_event_id: e.stripe_event_id,
            event_type: e.event_type,
            processed: e.processed,
            processing_error: e.processing_error,
            received_at: e.received_at,
            processed_at: e.processed_at,
        })
        .collect();

    Ok(Json(response))
}
