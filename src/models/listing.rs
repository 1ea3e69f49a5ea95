use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LenderProfile {
    pub id: String,
    pub profile_id: String,
    pub business_name: String,
    pub stripe_account_id: Option<String>,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub lender_id: String,
    pub title: String,
    pub cover_image_url: Option<String>,
    pub price_per_day: f64,
    pub deposit_amount: f64,
    pub quantity_available: i64,
    pub min_rental_days: i64,
    pub max_rental_days: Option<i64>,
    pub cancellation_policy: CancellationPolicy,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingVariant {
    pub id: String,
    pub listing_id: String,
    pub name: String,
    pub price_adjustment: f64,
    pub quantity_available: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingAddOn {
    pub id: String,
    pub listing_id: String,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancellationPolicy {
    Flexible,
    Moderate,
    Strict,
}

impl CancellationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::Flexible => "flexible",
            CancellationPolicy::Moderate => "moderate",
            CancellationPolicy::Strict => "strict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "flexible" => Some(CancellationPolicy::Flexible),
            "moderate" => Some(CancellationPolicy::Moderate),
            "strict" => Some(CancellationPolicy::Strict),
            _ => None,
        }
    }

    /// Text shown to renters. Refunds stay a manual lender decision.
    pub fn notice(&self) -> &'static str {
        match self {
            CancellationPolicy::Flexible => {
                "Full refund if cancelled at least 48 hours before the rental starts."
            }
            CancellationPolicy::Moderate => {
                "Full refund if cancelled at least 7 days before the rental starts."
            }
            CancellationPolicy::Strict => {
                "Full refund if cancelled at least 14 days before the rental starts."
            }
        }
    }
}
