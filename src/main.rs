use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use rentbook::config::AppConfig;
use rentbook::db::{self, SqliteRepository};
use rentbook::handlers;
use rentbook::services::payments::stripe::StripeProcessor;
use rentbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    if let Err(e) = config.stripe_secret_key() {
        tracing::warn!(error = %e, "checkout is unavailable until the payment key is fixed");
    }
    if let Err(e) = config.stripe_webhook_secret() {
        tracing::warn!(error = %e, "payment webhooks will be rejected");
    }

    let conn = db::init_db(&config.database_url)?;
    let processor = StripeProcessor::new(config.stripe_secret_key.trim().to_string());
    let state = Arc::new(AppState::new(
        config.clone(),
        SqliteRepository::new(conn),
        Box::new(processor),
    ));

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/api/bookings",
            get(handlers::bookings::list_bookings).post(handlers::bookings::create_booking),
        )
        .route("/api/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/api/bookings/:id/confirm",
            post(handlers::bookings::confirm_booking),
        )
        .route(
            "/api/bookings/:id/reject",
            post(handlers::bookings::reject_booking),
        )
        .route(
            "/api/bookings/:id/activate",
            post(handlers::bookings::activate_booking),
        )
        .route(
            "/api/bookings/:id/complete",
            post(handlers::bookings::complete_booking),
        )
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/:id/refund-request",
            post(handlers::bookings::request_refund),
        )
        .route(
            "/api/stripe/create-checkout-session",
            post(handlers::checkout::create_checkout_session),
        )
        .route("/api/webhooks/stripe", post(handlers::webhook::stripe_webhook))
        .route(
            "/api/admin/webhook-events",
            get(handlers::admin::get_webhook_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
