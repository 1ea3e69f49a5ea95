use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{BookingRepository, ListingRepository, PaymentRepository, SqliteRepository};
use crate::services::payments::PaymentProcessor;

pub struct AppState {
    pub config: AppConfig,
    pub listings: Arc<dyn ListingRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub processor: Box<dyn PaymentProcessor>,
}

impl AppState {
    /// Wires every repository to the same SQLite store.
    pub fn new(config: AppConfig, repo: SqliteRepository, processor: Box<dyn PaymentProcessor>) -> Self {
        let repo = Arc::new(repo);
        Self {
            config,
            listings: repo.clone(),
            bookings: repo.clone(),
            payments: repo,
            processor,
        }
    }
}
