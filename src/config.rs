use std::env;

use crate::errors::AppError;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub app_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "rentbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            app_url: env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
        }
    }

    /// The secret key is opaque; only its prefix is checked.
    pub fn stripe_secret_key(&self) -> Result<&str, AppError> {
        let key = self.stripe_secret_key.trim();
        if key.is_empty() {
            return Err(AppError::Config("STRIPE_SECRET_KEY is not set".to_string()));
        }
        if !key.starts_with("sk_") {
            return Err(AppError::Config(
                "STRIPE_SECRET_KEY must start with sk_".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn stripe_webhook_secret(&self) -> Result<&str, AppError> {
        let secret = self.stripe_webhook_secret.trim();
        if secret.is_empty() {
            return Err(AppError::Config(
                "STRIPE_WEBHOOK_SECRET is not set".to_string(),
            ));
        }
        Ok(secret)
    }
}
