use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{CheckoutSession, CheckoutSessionRequest, PaymentProcessor};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook timestamp, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

pub struct StripeProcessor {
    secret_key: String,
    client: reqwest::Client,
}

impl StripeProcessor {
    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
    payment_intent: Option<String>,
}

/// Flattens a checkout request into Stripe's bracketed form encoding.
pub fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
    ];

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".into(), email.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            request.currency.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        if let Some(description) = &item.description {
            form.push((
                format!("{prefix}[price_data][product_data][description]"),
                description.clone(),
            ));
        }
        if let Some(image) = &item.image_url {
            form.push((
                format!("{prefix}[price_data][product_data][images][0]"),
                image.clone(),
            ));
        }
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value.clone()));
    }

    form.push((
        "payment_intent_data[application_fee_amount]".into(),
        request.application_fee_amount.to_string(),
    ));
    form.push((
        "payment_intent_data[transfer_data][destination]".into(),
        request.destination_account.clone(),
    ));

    form
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> anyhow::Result<CheckoutSession> {
        let resp = self
            .client
            .post(format!("{STRIPE_API_BASE}/checkout/sessions"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&checkout_form(request))
            .send()
            .await
            .context("failed to call Stripe API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Stripe API error ({status}): {body}");
        }

        let session: CreateCheckoutSessionResponse = resp
            .json()
            .await
            .context("failed to parse Stripe checkout session")?;

        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
            payment_intent_id: session.payment_intent,
        })
    }
}

// ── Webhook signatures ──

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SignatureError {
    #[error("malformed stripe-signature header")]
    Malformed,
    #[error("webhook timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

fn compute_signature(secret: &str, timestamp: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a `stripe-signature` header value for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let ts = timestamp.to_string();
    let sig = compute_signature(secret, &ts, payload).unwrap_or_default();
    format!("t={ts},v1={sig}")
}

/// Checks a `t=<unix>,v1=<hex>` header. Any of several `v1` entries may match.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        if let Some(t) = part.trim().strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.trim().strip_prefix("v1=") {
            candidates.push(s);
        }
    }

    let timestamp_str = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let ts: i64 = timestamp_str.parse().map_err(|_| SignatureError::Malformed)?;
    let age = now.abs_diff(ts);
    if age > WEBHOOK_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(age, "stripe webhook timestamp outside tolerance");
        return Err(SignatureError::Expired);
    }

    let expected = compute_signature(secret, timestamp_str, payload)?;
    let expected = expected.as_bytes();

    let matched = candidates
        .iter()
        .any(|c| c.len() == expected.len() && bool::from(c.as_bytes().ct_eq(expected)));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ── Webhook payloads ──

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Connected account the event originated from, if any.
    pub account: Option<String>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.data.object.clone())
            .with_context(|| format!("malformed {} payload", self.event_type))
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Deserialize)]
pub struct LastPaymentError {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    pub amount: i64,
    pub amount_refunded: i64,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub refunds: Option<RefundList>,
}

#[derive(Debug, Deserialize)]
pub struct RefundList {
    #[serde(default)]
    pub data: Vec<RefundObject>,
}

#[derive(Debug, Deserialize)]
pub struct RefundObject {
    pub id: String,
    pub amount: i64,
    pub reason: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

#[derive(Debug, Deserialize)]
pub struct PayoutObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub arrival_date: Option<i64>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisputeObject {
    pub id: String,
    pub amount: i64,
    pub charge: String,
    pub payment_intent: Option<String>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, 1_700_000_000, payload);
        assert_eq!(verify_signature(SECRET, payload, &header, 1_700_000_010), Ok(()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let header = signature_header(SECRET, 1_700_000_000, br#"{"id":"evt_1"}"#);
        assert_eq!(
            verify_signature(SECRET, br#"{"id":"evt_2"}"#, &header, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = signature_header("whsec_other", 1_700_000_000, payload);
        assert_eq!(
            verify_signature(SECRET, payload, &header, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = signature_header(SECRET, 1_700_000_000, payload);
        assert_eq!(
            verify_signature(SECRET, payload, &header, 1_700_000_000 + WEBHOOK_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_extreme_timestamps_expire() {
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert_eq!(
                verify_signature(SECRET, b"{}", header, 1_700_000_000),
                Err(SignatureError::Expired)
            );
        }
        assert_eq!(
            verify_signature(SECRET, b"{}", "t=1700000000,v1=00", i64::MIN),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_malformed_header() {
        assert_eq!(
            verify_signature(SECRET, b"{}", "v1=abc", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(SECRET, b"{}", "t=notanumber,v1=abc", 0),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_second_v1_entry_accepted() {
        let payload = b"{}";
        let good = signature_header(SECRET, 100, payload);
        let sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=100,v1={},v1={sig}", "0".repeat(64));
        assert_eq!(verify_signature(SECRET, payload, &header, 100), Ok(()));
    }

    #[test]
    fn test_checkout_form_has_fee_and_destination() {
        let request = CheckoutSessionRequest {
            currency: "usd".to_string(),
            line_items: vec![super::super::CheckoutLineItem {
                name: "Arch".to_string(),
                description: None,
                image_url: None,
                unit_amount: 20000,
                quantity: 1,
            }],
            customer_email: Some("renter@example.com".to_string()),
            success_url: "https://x/success".to_string(),
            cancel_url: "https://x/cancel".to_string(),
            metadata: vec![("booking_id".to_string(), "bk-1".to_string())],
            application_fee_amount: 2000,
            destination_account: "acct_123".to_string(),
        };

        let form = checkout_form(&request);
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("payment_intent_data[application_fee_amount]"), Some("2000"));
        assert_eq!(
            get("payment_intent_data[transfer_data][destination]"),
            Some("acct_123")
        );
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("20000"));
        assert_eq!(get("metadata[booking_id]"), Some("bk-1"));
        assert_eq!(get("customer_email"), Some("renter@example.com"));
    }
}
