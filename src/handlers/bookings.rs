use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::acting_user;
use crate::errors::AppResult;
use crate::models::{Booking, BookingAddOn, BookingDeposit, Refund};
use crate::services::lifecycle::{self, Cancellation, NewBookingRequest};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewBookingRequest>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let user = acting_user(&headers)?;
    let booking = lifecycle::create_booking(state.listings.as_ref(), state.bookings.as_ref(), &user, &req)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Booking>>> {
    let user = acting_user(&headers)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(state.bookings.list_bookings_for_profile(&user, limit)?))
}

// GET /api/bookings/:id
#[derive(Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    booking: Booking,
    add_ons: Vec<BookingAddOn>,
    deposit: Option<BookingDeposit>,
    refunds: Vec<Refund>,
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<BookingDetail>> {
    let user = acting_user(&headers)?;
    let (booking, _) = lifecycle::load_for_actor(state.listings.as_ref(), state.bookings.as_ref(), &id, &user)?;

    Ok(Json(BookingDetail {
        add_ons: state.bookings.get_booking_add_ons(&booking.id)?,
        deposit: state.bookings.get_booking_deposit(&booking.id)?,
        refunds: state.bookings.get_refunds(&booking.id)?,
        booking,
    }))
}

// POST /api/bookings/:id/confirm
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let user = acting_user(&headers)?;
    let booking = lifecycle::confirm(state.listings.as_ref(), state.bookings.as_ref(), &id, &user)?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/reject
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let user = acting_user(&headers)?;
    let booking = lifecycle::reject(state.listings.as_ref(), state.bookings.as_ref(), &id, &user)?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/activate
pub async fn activate_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let user = acting_user(&headers)?;
    let booking = lifecycle::activate(state.listings.as_ref(), state.bookings.as_ref(), &id, &user)?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/complete
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let user = acting_user(&headers)?;
    let booking = lifecycle::complete(state.listings.as_ref(), state.bookings.as_ref(), &id, &user)?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/cancel
#[derive(Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> AppResult<Json<Cancellation>> {
    let user = acting_user(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    let cancellation = lifecycle::cancel(
        state.listings.as_ref(),
        state.bookings.as_ref(),
        &id,
        &user,
        reason.as_deref(),
        Utc::now().date_naive(),
    )?;
    Ok(Json(cancellation))
}

// POST /api/bookings/:id/refund-request
#[derive(Deserialize, Default)]
pub struct RefundRequestBody {
    pub amount: Option<f64>,
    pub reason: Option<String>,
}

pub async fn request_refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RefundRequestBody>>,
) -> AppResult<(StatusCode, Json<Refund>)> {
    let user = acting_user(&headers)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let refund = lifecycle::request_refund(
        state.listings.as_ref(),
        state.bookings.as_ref(),
        &id,
        &user,
        body.amount,
        body.reason,
    )?;
    Ok((StatusCode::CREATED, Json(refund)))
}
