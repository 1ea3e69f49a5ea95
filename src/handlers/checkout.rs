use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::acting_user;
use crate::errors::AppResult;
use crate::services::checkout::{self, CheckoutResponse};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub booking_id: String,
}

// POST /api/stripe/create-checkout-session
pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let user = acting_user(&headers)?;
    let response = checkout::create_checkout_session(
        &state.config,
        state.listings.as_ref(),
        state.bookings.as_ref(),
        state.processor.as_ref(),
        &req.booking_id,
        &user,
    )
    .await?;
    Ok(Json(response))
}
