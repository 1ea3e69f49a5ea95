use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{BookingRepository, ListingRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{
    rental_days, Booking, BookingAddOn, BookingDeposit, BookingStatus, DepositStatus, Listing,
    PaymentStatus, Refund, RefundStatus,
};
use crate::services::pricing::{self, PriceInputs};

/// Days before the start date from which a cancellation is flagged as
/// eligible for a full refund.
pub const FULL_REFUND_MIN_DAYS: i64 = 2;

const REJECTED_REASON: &str = "rejected by lender";

#[derive(Debug, Clone, Deserialize)]
pub struct NewBookingRequest {
    pub listing_id: String,
    pub variant_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quantity: i64,
    #[serde(default)]
    pub add_on_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Renter,
    Lender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundEligibility {
    Full,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cancellation {
    pub booking: Booking,
    pub refund_eligibility: RefundEligibility,
    pub policy_notice: &'static str,
}

/// Advisory only: nothing is refunded because of this value.
pub fn refund_eligibility(start_date: NaiveDate, today: NaiveDate) -> RefundEligibility {
    if (start_date - today).num_days() >= FULL_REFUND_MIN_DAYS {
        RefundEligibility::Full
    } else {
        RefundEligibility::Partial
    }
}

fn validate_request(req: &NewBookingRequest, listing: &Listing) -> AppResult<i64> {
    if req.start_date > req.end_date {
        return Err(AppError::Validation(
            "end date must be on or after the start date".to_string(),
        ));
    }
    if req.quantity < 1 {
        return Err(AppError::Validation("quantity must be at least 1".to_string()));
    }

    let duration = rental_days(req.start_date, req.end_date);
    if duration < listing.min_rental_days {
        return Err(AppError::Validation(format!(
            "minimum rental is {} day(s)",
            listing.min_rental_days
        )));
    }
    if let Some(max) = listing.max_rental_days {
        if duration > max {
            return Err(AppError::Validation(format!("maximum rental is {max} day(s)")));
        }
    }

    Ok(duration)
}

pub fn create_booking(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    renter_id: &str,
    req: &NewBookingRequest,
) -> AppResult<Booking> {
    let listing = listings
        .get_listing(&req.listing_id)?
        .filter(|l| l.is_active)
        .ok_or_else(|| AppError::NotFound("listing".to_string()))?;

    listings
        .get_profile(renter_id)?
        .ok_or_else(|| AppError::NotFound("renter profile".to_string()))?;

    let lender = listings
        .get_lender(&listing.lender_id)?
        .ok_or_else(|| AppError::NotFound("lender".to_string()))?;
    if lender.profile_id == renter_id {
        return Err(AppError::Validation("you cannot book your own listing".to_string()));
    }

    let duration = validate_request(req, &listing)?;

    let (stock, variant_adjustment) = match &req.variant_id {
        Some(variant_id) => {
            let variant = listings
                .get_variant(variant_id)?
                .filter(|v| v.listing_id == listing.id)
                .ok_or_else(|| AppError::NotFound("listing variant".to_string()))?;
            (variant.quantity_available, variant.price_adjustment)
        }
        None => (listing.quantity_available, 0.0),
    };

    if listings.blocked_dates(&listing.id, req.start_date, req.end_date)? > 0 {
        return Err(AppError::Validation(
            "the listing is unavailable on some of the selected dates".to_string(),
        ));
    }

    let reserved = listings.booked_quantity(
        &listing.id,
        req.variant_id.as_deref(),
        req.start_date,
        req.end_date,
    )?;
    let available = (stock - reserved).max(0);
    if req.quantity > available {
        return Err(AppError::Validation(format!(
            "only {available} available for the selected dates"
        )));
    }

    let catalog = listings.get_listing_add_ons(&listing.id)?;
    let mut selected = Vec::with_capacity(req.add_on_ids.len());
    for id in &req.add_on_ids {
        let add_on = catalog
            .iter()
            .find(|a| &a.id == id)
            .ok_or_else(|| AppError::Validation(format!("unknown add-on: {id}")))?;
        selected.push(add_on);
    }
    let add_on_prices: Vec<f64> = selected.iter().map(|a| a.price).collect();

    let quote = pricing::quote(&PriceInputs {
        price_per_day: listing.price_per_day,
        variant_adjustment_per_day: variant_adjustment,
        duration_days: duration,
        quantity: req.quantity,
        add_on_prices: &add_on_prices,
        deposit: listing.deposit_amount,
    });

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        renter_id: renter_id.to_string(),
        lender_id: lender.id.clone(),
        listing_id: listing.id.clone(),
        variant_id: req.variant_id.clone(),
        start_date: req.start_date,
        end_date: req.end_date,
        quantity: req.quantity,
        subtotal: quote.subtotal,
        deposit_amount: quote.deposit,
        total_price: quote.total,
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
    };

    let add_on_rows: Vec<BookingAddOn> = selected
        .iter()
        .map(|a| BookingAddOn {
            booking_id: booking.id.clone(),
            add_on_id: a.id.clone(),
            name: a.name.clone(),
            unit_price: a.price,
            quantity: req.quantity,
        })
        .collect();

    let deposit = (quote.deposit > 0.0).then(|| BookingDeposit {
        booking_id: booking.id.clone(),
        amount: quote.deposit,
        status: DepositStatus::Held,
        refunded_at: None,
    });

    if !bookings.create_booking(&booking, &add_on_rows, deposit.as_ref(), stock)? {
        tracing::warn!(listing_id = %booking.listing_id, "stock taken by a concurrent booking");
        return Err(AppError::Conflict(
            "the requested quantity is no longer available, reload and try again".to_string(),
        ));
    }

    tracing::info!(
        booking_id = %booking.id,
        listing_id = %booking.listing_id,
        total = booking.total_price,
        "booking created"
    );

    Ok(booking)
}

/// Resolves which party `user_id` is for this booking. Strangers get a
/// not-found so booking ids are not confirmed to them.
pub fn authorize(
    listings: &dyn ListingRepository,
    booking: &Booking,
    user_id: &str,
) -> AppResult<Actor> {
    if booking.renter_id == user_id {
        return Ok(Actor::Renter);
    }
    let lender = listings.get_lender(&booking.lender_id)?;
    match lender {
        Some(l) if l.profile_id == user_id => Ok(Actor::Lender),
        _ => Err(AppError::NotFound("booking".to_string())),
    }
}

pub fn load_for_actor(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
) -> AppResult<(Booking, Actor)> {
    let booking = bookings
        .get_booking(booking_id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    let actor = authorize(listings, &booking, user_id)?;
    Ok((booking, actor))
}

fn apply_transition(
    bookings: &dyn BookingRepository,
    booking: &Booking,
    to: BookingStatus,
    reason: Option<&str>,
) -> AppResult<Booking> {
    if !booking.status.can_transition_to(to) {
        return Err(AppError::Validation(format!(
            "cannot move a {} booking to {}",
            booking.status.as_str(),
            to.as_str()
        )));
    }

    if !bookings.transition(&booking.id, booking.status, to, booking.version, reason)? {
        tracing::warn!(
            booking_id = %booking.id,
            from = booking.status.as_str(),
            to = to.as_str(),
            "booking changed concurrently"
        );
        return Err(AppError::Conflict(
            "booking was modified by someone else, reload and try again".to_string(),
        ));
    }

    tracing::info!(
        booking_id = %booking.id,
        from = booking.status.as_str(),
        to = to.as_str(),
        "booking status changed"
    );

    bookings
        .get_booking(&booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))
}

fn require_lender(actor: Actor) -> AppResult<()> {
    match actor {
        Actor::Lender => Ok(()),
        Actor::Renter => Err(AppError::Forbidden(
            "only the lender can perform this action".to_string(),
        )),
    }
}

pub fn confirm(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
) -> AppResult<Booking> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    require_lender(actor)?;
    apply_transition(bookings, &booking, BookingStatus::Confirmed, None)
}

pub fn reject(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
) -> AppResult<Booking> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    require_lender(actor)?;
    if booking.status != BookingStatus::Pending {
        return Err(AppError::Validation(
            "only pending bookings can be rejected".to_string(),
        ));
    }
    apply_transition(bookings, &booking, BookingStatus::Cancelled, Some(REJECTED_REASON))
}

pub fn activate(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
) -> AppResult<Booking> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    require_lender(actor)?;
    apply_transition(bookings, &booking, BookingStatus::Active, None)
}

/// Completion also releases the held deposit.
pub fn complete(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
) -> AppResult<Booking> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    require_lender(actor)?;
    apply_transition(bookings, &booking, BookingStatus::Completed, None)
}

pub fn cancel(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
    reason: Option<&str>,
    today: NaiveDate,
) -> AppResult<Cancellation> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    let policy = listings
        .get_listing(&booking.listing_id)?
        .map(|l| l.cancellation_policy)
        .ok_or_else(|| AppError::NotFound("listing".to_string()))?;

    let default_reason = match actor {
        Actor::Renter => "cancelled by renter",
        Actor::Lender => "cancelled by lender",
    };
    let cancelled = apply_transition(
        bookings,
        &booking,
        BookingStatus::Cancelled,
        Some(reason.unwrap_or(default_reason)),
    )?;

    Ok(Cancellation {
        refund_eligibility: refund_eligibility(cancelled.start_date, today),
        policy_notice: policy.notice(),
        booking: cancelled,
    })
}

/// Files a refund request for manual handling by the lender.
pub fn request_refund(
    listings: &dyn ListingRepository,
    bookings: &dyn BookingRepository,
    booking_id: &str,
    user_id: &str,
    amount: Option<f64>,
    reason: Option<String>,
) -> AppResult<Refund> {
    let (booking, actor) = load_for_actor(listings, bookings, booking_id, user_id)?;
    if actor != Actor::Renter {
        return Err(AppError::Forbidden(
            "only the renter can request a refund".to_string(),
        ));
    }
    if !matches!(
        booking.payment_status,
        PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
    ) {
        return Err(AppError::Validation(
            "refunds can only be requested for paid bookings".to_string(),
        ));
    }

    let already_refunded: f64 = bookings
        .get_refunds(&booking.id)?
        .iter()
        .filter(|r| r.status == RefundStatus::Completed)
        .map(|r| r.amount)
        .sum();
    let remaining = pricing::round_cents(booking.total_price - already_refunded);
    let amount = pricing::round_cents(amount.unwrap_or(remaining));
    if amount <= 0.0 || amount > remaining {
        return Err(AppError::Validation(format!(
            "refund amount must be between 0.01 and {remaining:.2}"
        )));
    }

    let refund = Refund {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        amount,
        reason,
        status: RefundStatus::Pending,
        stripe_refund_id: None,
        created_at: Utc::now().naive_utc(),
    };
    bookings.insert_refund(&refund)?;

    tracing::info!(booking_id = %booking.id, amount, "refund requested");

    Ok(refund)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, queries, SqliteRepository};
    use crate::models::{CancellationPolicy, LenderProfile, ListingAddOn, ListingVariant, Profile};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> SqliteRepository {
        let repo = SqliteRepository::new(db::init_db(":memory:").unwrap());
        repo.with_conn(|conn| {
            for (id, email) in [("renter-1", "renter@example.com"), ("owner-1", "owner@example.com")] {
                queries::insert_profile(
                    conn,
                    &Profile {
                        id: id.to_string(),
                        email: email.to_string(),
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
                    stripe_account_id: Some("acct_1".to_string()),
                    charges_enabled: true,
                    payouts_enabled: true,
                    details_submitted: true,
                },
            )?;
            queries::insert_listing(
                conn,
                &Listing {
                    id: "listing-1".to_string(),
                    lender_id: "lender-1".to_string(),
                    title: "Floral Arch".to_string(),
                    cover_image_url: None,
                    price_per_day: 40.0,
                    deposit_amount: 50.0,
                    quantity_available: 3,
                    min_rental_days: 1,
                    max_rental_days: Some(7),
                    cancellation_policy: CancellationPolicy::Flexible,
                    is_active: true,
                },
            )?;
            queries::insert_variant(
                conn,
                &ListingVariant {
                    id: "variant-gold".to_string(),
                    listing_id: "listing-1".to_string(),
                    name: "Gold".to_string(),
                    price_adjustment: 10.0,
                    quantity_available: 1,
                },
            )?;
            queries::insert_add_on(
                conn,
                &ListingAddOn {
                    id: "addon-lights".to_string(),
                    listing_id: "listing-1".to_string(),
                    name: "Fairy lights".to_string(),
                    price: 15.0,
                },
            )?;
            Ok(())
        })
        .unwrap();
        repo
    }

    fn request(start: &str, end: &str, quantity: i64) -> NewBookingRequest {
        NewBookingRequest {
            listing_id: "listing-1".to_string(),
            variant_id: None,
            start_date: d(start),
            end_date: d(end),
            quantity,
            add_on_ids: vec![],
        }
    }

    #[test]
    fn test_create_booking_prices_and_rows() {
        let repo = setup();
        let mut req = request("2025-06-14", "2025-06-16", 1);
        req.variant_id = Some("variant-gold".to_string());
        req.add_on_ids = vec!["addon-lights".to_string()];

        let booking = create_booking(&repo, &repo, "renter-1", &req).unwrap();

        // (40 + 10) * 3 days + 15 add-on
        assert_eq!(booking.subtotal, 165.0);
        assert_eq!(booking.deposit_amount, 50.0);
        assert_eq!(booking.total_price, 215.0);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);

        let add_ons = repo.get_booking_add_ons(&booking.id).unwrap();
        assert_eq!(add_ons.len(), 1);
        assert_eq!(add_ons[0].unit_price, 15.0);

        let deposit = repo.get_booking_deposit(&booking.id).unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Held);
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let repo = setup();
        let err = create_booking(&repo, &repo, "renter-1", &request("2025-06-16", "2025-06-14", 1))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_duration_limits() {
        let repo = setup();
        let err = create_booking(&repo, &repo, "renter-1", &request("2025-06-01", "2025-06-10", 1))
            .unwrap_err();
        assert!(err.to_string().contains("maximum rental"));
    }

    #[test]
    fn test_overlapping_stock_is_enforced() {
        let repo = setup();
        create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-16", 2)).unwrap();

        let err = create_booking(&repo, &repo, "renter-1", &request("2025-06-16", "2025-06-17", 2))
            .unwrap_err();
        assert!(err.to_string().contains("only 1 available"));

        // Adjacent range does not overlap
        create_booking(&repo, &repo, "renter-1", &request("2025-06-17", "2025-06-18", 3)).unwrap();
    }

    #[test]
    fn test_store_rechecks_stock_on_insert() {
        let repo = setup();
        let first = create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-16", 2)).unwrap();

        // A second request priced against the same empty snapshot.
        let mut late = first.clone();
        late.id = "bk-late".to_string();
        assert!(!repo.create_booking(&late, &[], None, 3).unwrap());
        assert!(repo.get_booking("bk-late").unwrap().is_none());
        assert_eq!(
            repo.booked_quantity("listing-1", None, d("2025-06-14"), d("2025-06-16")).unwrap(),
            2
        );
    }

    #[test]
    fn test_concurrent_creates_never_oversell() {
        let repo = setup();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 2))
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => created += 1,
                Err(AppError::Conflict(_)) | Err(AppError::Validation(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(
            repo.booked_quantity("listing-1", None, d("2025-06-14"), d("2025-06-15")).unwrap(),
            2
        );
    }

    #[test]
    fn test_blocked_date_rejected() {
        let repo = setup();
        repo.with_conn(|conn| queries::block_listing_date(conn, "listing-1", d("2025-06-15")))
            .unwrap();
        let err = create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-16", 1))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_lender_cannot_book_own_listing() {
        let repo = setup();
        let err = create_booking(&repo, &repo, "owner-1", &request("2025-06-14", "2025-06-14", 1))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_full_lifecycle_refunds_deposit() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();

        let b = confirm(&repo, &repo, &booking.id, "owner-1").unwrap();
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert!(b.confirmed_at.is_some());

        let b = activate(&repo, &repo, &booking.id, "owner-1").unwrap();
        assert_eq!(b.status, BookingStatus::Active);

        let b = complete(&repo, &repo, &booking.id, "owner-1").unwrap();
        assert_eq!(b.status, BookingStatus::Completed);
        assert!(b.completed_at.is_some());

        let deposit = repo.get_booking_deposit(&booking.id).unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Refunded);
        assert!(deposit.refunded_at.is_some());

        // Terminal: no way back
        let err = cancel(&repo, &repo, &booking.id, "renter-1", None, d("2025-06-01")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_renter_cannot_confirm() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let err = confirm(&repo, &repo, &booking.id, "renter-1").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_stranger_sees_not_found() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let err = cancel(&repo, &repo, &booking.id, "someone-else", None, d("2025-06-01")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_activate_requires_confirmed() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let err = activate(&repo, &repo, &booking.id, "owner-1").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_reject_sets_reason() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let b = reject(&repo, &repo, &booking.id, "owner-1").unwrap();
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.cancellation_reason.as_deref(), Some(REJECTED_REASON));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();

        // Lender confirms first; a cancel computed from the old snapshot loses.
        confirm(&repo, &repo, &booking.id, "owner-1").unwrap();
        let err = apply_transition(&repo, &booking, BookingStatus::Cancelled, None).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let current = repo.get_booking(&booking.id).unwrap().unwrap();
        assert_eq!(current.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_cancellation_eligibility() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let result = cancel(&repo, &repo, &booking.id, "renter-1", None, d("2025-06-13")).unwrap();
        assert_eq!(result.refund_eligibility, RefundEligibility::Partial);
        assert_eq!(result.booking.status, BookingStatus::Cancelled);
        assert!(result.policy_notice.contains("48 hours"));

        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let result = cancel(&repo, &repo, &booking.id, "owner-1", None, d("2025-06-11")).unwrap();
        assert_eq!(result.refund_eligibility, RefundEligibility::Full);
        assert_eq!(
            result.booking.cancellation_reason.as_deref(),
            Some("cancelled by lender")
        );
    }

    #[test]
    fn test_refund_eligibility_boundary() {
        assert_eq!(refund_eligibility(d("2025-06-14"), d("2025-06-12")), RefundEligibility::Full);
        assert_eq!(refund_eligibility(d("2025-06-14"), d("2025-06-13")), RefundEligibility::Partial);
        assert_eq!(refund_eligibility(d("2025-06-14"), d("2025-06-20")), RefundEligibility::Partial);
    }

    #[test]
    fn test_refund_request_requires_payment() {
        let repo = setup();
        let booking =
            create_booking(&repo, &repo, "renter-1", &request("2025-06-14", "2025-06-15", 1)).unwrap();
        let err = request_refund(&repo, &repo, &booking.id, "renter-1", None, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
