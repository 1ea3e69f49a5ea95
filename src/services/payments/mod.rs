pub mod stripe;

use async_trait::async_trait;
use serde::Serialize;

/// One priced line on a hosted checkout page, in minor currency units.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSessionRequest {
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
    /// Platform commission kept from the charge.
    pub application_fee_amount: i64,
    /// Connected account that receives the remaining funds.
    pub destination_account: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub payment_intent_id: Option<String>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> anyhow::Result<CheckoutSession>;
}
