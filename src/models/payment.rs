use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Add-on attached to a booking at the price in effect when it was booked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingAddOn {
    pub booking_id: String,
    pub add_on_id: String,
    pub name: String,
    pub unit_price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDeposit {
    pub booking_id: String,
    pub amount: f64,
    pub status: DepositStatus,
    pub refunded_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Held,
    Refunded,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Held => "held",
            DepositStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "held" => Some(DepositStatus::Held),
            "refunded" => Some(DepositStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub booking_id: String,
    pub amount: f64,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub stripe_refund_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RefundStatus::Pending),
            "completed" => Some(RefundStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub lender_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: PayoutStatus,
    pub stripe_payout_id: String,
    pub failure_message: Option<String>,
    pub arrival_date: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "paid" => Some(PayoutStatus::Paid),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuditEntry {
    pub id: i64,
    pub booking_id: Option<String>,
    pub lender_id: Option<String>,
    pub event: String,
    pub details: serde_json::Value,
    pub created_at: String,
}
