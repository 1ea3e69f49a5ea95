use serde::{Deserialize, Serialize};

/// One inbound payment-processor event as received, before any handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: i64,
    pub stripe_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub received_at: String,
    pub processed_at: Option<String>,
}
