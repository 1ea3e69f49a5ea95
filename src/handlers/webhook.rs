use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::services::payments::stripe::{self, StripeEvent};
use crate::services::reconcile::Reconciler;
use crate::state::AppState;

// POST /api/webhooks/stripe
//
// The body must stay raw bytes: the signature covers the exact payload.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = state.config.stripe_webhook_secret()?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("missing stripe-signature header");
            AppError::InvalidSignature("missing stripe-signature header".to_string())
        })?;

    if let Err(e) = stripe::verify_signature(secret, &body, signature, Utc::now().timestamp()) {
        tracing::warn!(error = %e, "rejected stripe webhook");
        return Err(AppError::InvalidSignature(e.to_string()));
    }

    let payload = std::str::from_utf8(&body)
        .map_err(|_| AppError::Validation("webhook payload is not valid UTF-8".to_string()))?;
    let event: StripeEvent = serde_json::from_str(payload)
        .map_err(|e| AppError::Validation(format!("invalid webhook payload: {e}")))?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "stripe webhook received");

    let reconciler = Reconciler {
        bookings: state.bookings.as_ref(),
        listings: state.listings.as_ref(),
        payments: state.payments.as_ref(),
    };
    reconciler.process(&event, payload)?;

    Ok(Json(json!({ "received": true })))
}
