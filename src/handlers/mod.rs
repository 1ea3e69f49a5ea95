pub mod admin;
pub mod bookings;
pub mod checkout;
pub mod health;
pub mod webhook;

use axum::http::HeaderMap;

use crate::errors::{AppError, AppResult};

/// Header carrying the authenticated profile id, set by the auth front.
pub const USER_HEADER: &str = "x-user-id";

pub(crate) fn acting_user(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}
