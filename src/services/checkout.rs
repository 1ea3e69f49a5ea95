use serde::Serialize;

use crate::config::AppConfig;
use crate::db::{BookingRepository, ListingRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, Listing, PaymentStatus};
use crate::services::lifecycle::{self, Actor};
use crate::services::payments::{CheckoutLineItem, CheckoutSessionRequest, PaymentProcessor};
use crate::services::pricing::{self, CheckoutAmounts};

pub const CURRENCY: &str = "usd";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

fn ensure_payable(booking: &Booking) -> AppResult<()> {
    if booking.payment_status == PaymentStatus::Paid {
        return Err(AppError::Validation("booking has already been paid".to_string()));
    }
    match booking.status {
        BookingStatus::Pending => Ok(()),
        BookingStatus::Cancelled => Err(AppError::Validation(
            "booking has been cancelled".to_string(),
        )),
        BookingStatus::Confirmed | BookingStatus::Active | BookingStatus::Completed => Err(
            AppError::Validation("booking is already confirmed".to_string()),
        ),
    }
}

pub fn build_session_request(
    config: &AppConfig,
    booking: &Booking,
    listing: &Listing,
    destination_account: &str,
    customer_email: Option<String>,
) -> (CheckoutSessionRequest, CheckoutAmounts) {
    let amounts = pricing::checkout_amounts(booking.subtotal, booking.deposit_amount);

    let mut line_items = vec![CheckoutLineItem {
        name: listing.title.clone(),
        description: Some(format!(
            "Rental {} to {} ({} day(s), quantity {})",
            booking.start_date,
            booking.end_date,
            booking.duration_days(),
            booking.quantity
        )),
        image_url: listing.cover_image_url.clone(),
        unit_amount: amounts.rental,
        quantity: 1,
    }];
    if amounts.deposit > 0 {
        line_items.push(CheckoutLineItem {
            name: "Security deposit".to_string(),
            description: Some("Refunded when the rental is completed".to_string()),
            image_url: None,
            unit_amount: amounts.deposit,
            quantity: 1,
        });
    }

    let base = config.app_url.trim_end_matches('/');
    let request = CheckoutSessionRequest {
        currency: CURRENCY.to_string(),
        line_items,
        customer_email,
        success_url: format!(
            "{base}/bookings/{}/success?session_id={{CHECKOUT_SESSION_ID}}",
            booking.id
        ),
        cancel_url: format!("{base}/bookings/{}?cancelled=true", booking.id),
        metadata: vec![
            ("booking_id".to_string(), booking.id.clone()),
            ("renter_id".to_string(), booking.renter_id.clone()),
            ("lender_id".to_string(), booking.lender_id.clone()),
            ("rental_amount".to_string(), amounts.rental.to_string()),
            ("deposit_amount".to_string(), amounts.deposit.to_string()),
            ("platform_fee".to_string(), amounts.platform_fee.to_string()),
        ],
        application_fee_amount: amounts.platform_fee,
        destination_account: destination_account.to_string(),
    };

    (request, amounts)
}

pub async fn create_checkout_session(
    config: &AppConfig,
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    processor: &dyn PaymentProcessor,
    booking_id: &str,
    user_id: &str,
) -> AppResult<CheckoutResponse> {
    config.stripe_secret_key()?;

    let (booking, actor) = lifecycle::load_for_actor(listings, bookings, booking_id, user_id)?;
    if actor != Actor::Renter {
        return Err(AppError::Forbidden("only the renter can pay for a booking".to_string()));
    }
    ensure_payable(&booking)?;

    let listing = listings
        .get_listing(&booking.listing_id)?
        .ok_or_else(|| AppError::NotFound("listing".to_string()))?;
    let lender = listings
        .get_lender(&booking.lender_id)?
        .ok_or_else(|| AppError::NotFound("lender".to_string()))?;

    let destination = match lender.stripe_account_id.as_deref() {
        Some(account) if !account.is_empty() => account.to_string(),
        _ => {
            return Err(AppError::Validation(
                "Lender has not set up payments yet".to_string(),
            ))
        }
    };
    if !lender.charges_enabled {
        return Err(AppError::Validation(
            "Lender's payment account is not yet approved to accept payments".to_string(),
        ));
    }

    let customer_email = listings.get_profile(&booking.renter_id)?.map(|p| p.email);
    let (request, amounts) =
        build_session_request(config, &booking, &listing, &destination, customer_email);

    let session = processor
        .create_checkout_session(&request)
        .await
        .map_err(|e| AppError::Payment(e.to_string()))?;

    if !bookings.attach_checkout_session(
        &booking.id,
        &session.id,
        session.payment_intent_id.as_deref(),
        booking.version,
    )? {
        tracing::warn!(
            booking_id = %booking.id,
            session_id = %session.id,
            "booking changed while the checkout session was created, session not attached"
        );
        return Err(AppError::Conflict(
            "booking was modified during checkout, reload and try again".to_string(),
        ));
    }

    tracing::info!(
        booking_id = %booking.id,
        session_id = %session.id,
        total = amounts.total,
        platform_fee = amounts.platform_fee,
        "checkout session created"
    );

    Ok(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, queries, SqliteRepository};
    use crate::models::{CancellationPolicy, LenderProfile, Profile};
    use crate::services::payments::CheckoutSession;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    fn config() -> AppConfig {
        AppConfig {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "t".to_string(),
            app_url: "https://rent.example.com/".to_string(),
            stripe_secret_key: "sk_test_x".to_string(),
            stripe_webhook_secret: "whsec_x".to_string(),
        }
    }

    fn booking(subtotal: f64, deposit: f64) -> Booking {
        let now = Utc::now().naive_utc();
        Booking {
            id: "bk-1".to_string(),
            renter_id: "renter-1".to_string(),
            lender_id: "lender-1".to_string(),
            listing_id: "listing-1".to_string(),
            variant_id: None,
            start_date: NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(),
            quantity: 1,
            subtotal,
            deposit_amount: deposit,
            total_price: subtotal + deposit,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            confirmed_at: None,
            cancelled_at: None,
            completed_at: None,
            cancellation_reason: None,
            stripe_checkout_session_id: None,
            stripe_payment_intent_id: None,
            payment_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn listing() -> Listing {
        Listing {
            id: "listing-1".to_string(),
            lender_id: "lender-1".to_string(),
            title: "Floral Arch".to_string(),
            cover_image_url: Some("https://img.example.com/arch.jpg".to_string()),
            price_per_day: 100.0,
            deposit_amount: 50.0,
            quantity_available: 1,
            min_rental_days: 1,
            max_rental_days: None,
            cancellation_policy: CancellationPolicy::Moderate,
            is_active: true,
        }
    }

    #[test]
    fn test_session_request_line_items_and_fee() {
        let (request, amounts) =
            build_session_request(&config(), &booking(200.0, 50.0), &listing(), "acct_9", None);

        let amounts_in_items: Vec<i64> = request.line_items.iter().map(|i| i.unit_amount).collect();
        assert_eq!(amounts_in_items, vec![20000, 5000]);
        assert_eq!(request.application_fee_amount, 2000);
        assert_eq!(amounts.lender_net, 23000);
        assert_eq!(request.destination_account, "acct_9");
        assert_eq!(
            request.success_url,
            "https://rent.example.com/bookings/bk-1/success?session_id={CHECKOUT_SESSION_ID}"
        );
        assert!(request
            .metadata
            .contains(&("booking_id".to_string(), "bk-1".to_string())));
    }

    #[test]
    fn test_no_deposit_line_when_zero() {
        let (request, _) =
            build_session_request(&config(), &booking(80.0, 0.0), &listing(), "acct_9", None);
        assert_eq!(request.line_items.len(), 1);
    }

    /// Stands in for a second checkout request that attaches its own session
    /// while this one is still talking to the processor.
    struct RacingProcessor {
        repo: SqliteRepository,
    }

    #[async_trait]
    impl PaymentProcessor for RacingProcessor {
        async fn create_checkout_session(
            &self,
            _request: &CheckoutSessionRequest,
        ) -> anyhow::Result<CheckoutSession> {
            assert!(self.repo.attach_checkout_session("bk-1", "cs_other", None, 0)?);
            Ok(CheckoutSession {
                id: "cs_mine".to_string(),
                url: "https://checkout.example.com/cs_mine".to_string(),
                payment_intent_id: None,
            })
        }
    }

    fn seeded_repo() -> SqliteRepository {
        let repo = SqliteRepository::new(db::init_db(":memory:").unwrap());
        repo.with_conn(|conn| {
            for id in ["renter-1", "owner-1"] {
                queries::insert_profile(
                    conn,
                    &Profile {
                        id: id.to_string(),
                        email: format!("{id}@example.com"),
                        full_name: None,
                    },
                )?;
            }
            queries::insert_lender_profile(
                conn,
                &LenderProfile {
                    id: "lender-1".to_string(),
                    profile_id: "owner-1".to_string(),
                    business_name: "Arches & Co".to_string(),
                    stripe_account_id: Some("acct_9".to_string()),
                    charges_enabled: true,
                    payouts_enabled: true,
                    details_submitted: true,
                },
            )?;
            queries::insert_listing(conn, &listing())?;
            queries::insert_booking(conn, &booking(200.0, 50.0))?;
            Ok(())
        })
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_concurrent_checkout_keeps_first_session() {
        let repo = seeded_repo();
        let processor = RacingProcessor { repo: repo.clone() };

        let err = create_checkout_session(&config(), &repo, &repo, &processor, "bk-1", "renter-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = repo.get_booking("bk-1").unwrap().unwrap();
        assert_eq!(stored.stripe_checkout_session_id.as_deref(), Some("cs_other"));
    }

    #[tokio::test]
    async fn test_checkout_attaches_session() {
        struct OkProcessor;

        #[async_trait]
        impl PaymentProcessor for OkProcessor {
            async fn create_checkout_session(
                &self,
                _request: &CheckoutSessionRequest,
            ) -> anyhow::Result<CheckoutSession> {
                Ok(CheckoutSession {
                    id: "cs_1".to_string(),
                    url: "https://checkout.example.com/cs_1".to_string(),
                    payment_intent_id: Some("pi_1".to_string()),
                })
            }
        }

        let repo = seeded_repo();
        let response = create_checkout_session(&config(), &repo, &repo, &OkProcessor, "bk-1", "renter-1")
            .await
            .unwrap();
        assert_eq!(response.session_id, "cs_1");

        let stored = repo.get_booking("bk-1").unwrap().unwrap();
        assert_eq!(stored.stripe_checkout_session_id.as_deref(), Some("cs_1"));
        assert_eq!(stored.stripe_payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn test_paid_booking_not_payable() {
        let mut b = booking(10.0, 0.0);
        b.payment_status = PaymentStatus::Paid;
        assert!(ensure_payable(&b).is_err());

        let mut b = booking(10.0, 0.0);
        b.status = BookingStatus::Completed;
        assert!(ensure_payable(&b).is_err());

        assert!(ensure_payable(&booking(10.0, 0.0)).is_ok());
    }
}
