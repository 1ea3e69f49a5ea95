use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::models::{
    Booking, BookingAddOn, BookingDeposit, BookingStatus, CancellationPolicy, DepositStatus,
    LenderProfile, Listing, ListingAddOn, ListingVariant, PaymentAuditEntry, PaymentStatus, Payout,
    PayoutStatus, Profile, Refund, RefundStatus, WebhookEvent,
};

fn now() -> String {
    Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid timestamp in store: {s}"))
}

fn parse_opt_timestamp(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("invalid date in store: {s}"))
}

// ── Profiles & Lenders ──

pub fn insert_profile(conn: &Connection, profile: &Profile) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO profiles (id, email, full_name) VALUES (?1, ?2, ?3)",
        params![profile.id, profile.email, profile.full_name],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection, id: &str) -> anyhow::Result<Option<Profile>> {
    let profile = conn
        .query_row(
            "SELECT id, email, full_name FROM profiles WHERE id = ?1",
            params![id],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    full_name: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(profile)
}

pub fn insert_lender_profile(conn: &Connection, lender: &LenderProfile) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO lender_profiles (id, profile_id, business_name, stripe_account_id, charges_enabled, payouts_enabled, details_submitted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lender.id,
            lender.profile_id,
            lender.business_name,
            lender.stripe_account_id,
            lender.charges_enabled,
            lender.payouts_enabled,
            lender.details_submitted,
        ],
    )?;
    Ok(())
}

const LENDER_COLUMNS: &str =
    "id, profile_id, business_name, stripe_account_id, charges_enabled, payouts_enabled, details_submitted";

fn lender_from_row(row: &rusqlite::Row) -> rusqlite::Result<LenderProfile> {
    Ok(LenderProfile {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        business_name: row.get(2)?,
        stripe_account_id: row.get(3)?,
        charges_enabled: row.get(4)?,
        payouts_enabled: row.get(5)?,
        details_submitted: row.get(6)?,
    })
}

pub fn get_lender_profile(conn: &Connection, id: &str) -> anyhow::Result<Option<LenderProfile>> {
    let lender = conn
        .query_row(
            &format!("SELECT {LENDER_COLUMNS} FROM lender_profiles WHERE id = ?1"),
            params![id],
            lender_from_row,
        )
        .optional()?;
    Ok(lender)
}

pub fn get_lender_by_stripe_account(
    conn: &Connection,
    stripe_account_id: &str,
) -> anyhow::Result<Option<LenderProfile>> {
    let lender = conn
        .query_row(
            &format!("SELECT {LENDER_COLUMNS} FROM lender_profiles WHERE stripe_account_id = ?1"),
            params![stripe_account_id],
            lender_from_row,
        )
        .optional()?;
    Ok(lender)
}

pub fn update_lender_account_flags(
    conn: &Connection,
    stripe_account_id: &str,
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE lender_profiles
         SET charges_enabled = ?1, payouts_enabled = ?2, details_submitted = ?3, updated_at = ?4
         WHERE stripe_account_id = ?5",
        params![
            charges_enabled,
            payouts_enabled,
            details_submitted,
            now(),
            stripe_account_id
        ],
    )?;
    Ok(count > 0)
}

// ── Listings ──

pub fn insert_listing(conn: &Connection, listing: &Listing) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO listings (id, lender_id, title, cover_image_url, price_per_day, deposit_amount, quantity_available, min_rental_days, max_rental_days, cancellation_policy, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            listing.id,
            listing.lender_id,
            listing.title,
            listing.cover_image_url,
            listing.price_per_day,
            listing.deposit_amount,
            listing.quantity_available,
            listing.min_rental_days,
            listing.max_rental_days,
            listing.cancellation_policy.as_str(),
            listing.is_active,
        ],
    )?;
    Ok(())
}

pub fn get_listing(conn: &Connection, id: &str) -> anyhow::Result<Option<Listing>> {
    let row = conn
        .query_row(
            "SELECT id, lender_id, title, cover_image_url, price_per_day, deposit_amount, quantity_available, min_rental_days, max_rental_days, cancellation_policy, is_active
             FROM listings WHERE id = ?1",
            params![id],
            |row| {
                let policy: String = row.get(9)?;
                Ok((
                    Listing {
                        id: row.get(0)?,
                        lender_id: row.get(1)?,
                        title: row.get(2)?,
                        cover_image_url: row.get(3)?,
                        price_per_day: row.get(4)?,
                        deposit_amount: row.get(5)?,
                        quantity_available: row.get(6)?,
                        min_rental_days: row.get(7)?,
                        max_rental_days: row.get(8)?,
                        cancellation_policy: CancellationPolicy::Moderate,
                        is_active: row.get(10)?,
                    },
                    policy,
                ))
            },
        )
        .optional()?;

    match row {
        Some((mut listing, policy)) => {
            listing.cancellation_policy = CancellationPolicy::parse(&policy)
                .with_context(|| format!("unknown cancellation policy: {policy}"))?;
            Ok(Some(listing))
        }
        None => Ok(None),
    }
}

pub fn insert_variant(conn: &Connection, variant: &ListingVariant) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO listing_variants (id, listing_id, name, price_adjustment, quantity_available)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            variant.id,
            variant.listing_id,
            variant.name,
            variant.price_adjustment,
            variant.quantity_available,
        ],
    )?;
    Ok(())
}

pub fn get_variant(conn: &Connection, id: &str) -> anyhow::Result<Option<ListingVariant>> {
    let variant = conn
        .query_row(
            "SELECT id, listing_id, name, price_adjustment, quantity_available
             FROM listing_variants WHERE id = ?1",
            params![id],
            |row| {
                Ok(ListingVariant {
                    id: row.get(0)?,
                    listing_id: row.get(1)?,
                    name: row.get(2)?,
                    price_adjustment: row.get(3)?,
                    quantity_available: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(variant)
}

pub fn insert_add_on(conn: &Connection, add_on: &ListingAddOn) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO listing_add_ons (id, listing_id, name, price) VALUES (?1, ?2, ?3, ?4)",
        params![add_on.id, add_on.listing_id, add_on.name, add_on.price],
    )?;
    Ok(())
}

pub fn get_listing_add_ons(conn: &Connection, listing_id: &str) -> anyhow::Result<Vec<ListingAddOn>> {
    let mut stmt = conn.prepare(
        "SELECT id, listing_id, name, price FROM listing_add_ons WHERE listing_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![listing_id], |row| {
        Ok(ListingAddOn {
            id: row.get(0)?,
            listing_id: row.get(1)?,
            name: row.get(2)?,
            price: row.get(3)?,
        })
    })?;

    let mut add_ons = vec![];
    for row in rows {
        add_ons.push(row?);
    }
    Ok(add_ons)
}

pub fn block_listing_date(conn: &Connection, listing_id: &str, date: NaiveDate) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO listing_blocked_dates (listing_id, blocked_date) VALUES (?1, ?2)",
        params![listing_id, fmt_date(date)],
    )?;
    Ok(())
}

pub fn count_blocked_dates(
    conn: &Connection,
    listing_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM listing_blocked_dates
         WHERE listing_id = ?1 AND blocked_date >= ?2 AND blocked_date <= ?3",
        params![listing_id, fmt_date(start), fmt_date(end)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Units already reserved for an overlapping date range by bookings that
/// still hold stock.
pub fn booked_quantity(
    conn: &Connection,
    listing_id: &str,
    variant_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<i64> {
    let quantity: i64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM bookings
         WHERE listing_id = ?1 AND variant_id IS ?2
           AND status != 'cancelled' AND status != 'completed'
           AND start_date <= ?4 AND end_date >= ?3",
        params![listing_id, variant_id, fmt_date(start), fmt_date(end)],
        |row| row.get(0),
    )?;
    Ok(quantity)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, renter_id, lender_id, listing_id, variant_id, start_date, end_date, quantity, \
     subtotal, deposit_amount, total_price, status, payment_status, confirmed_at, cancelled_at, completed_at, \
     cancellation_reason, stripe_checkout_session_id, stripe_payment_intent_id, payment_error, version, \
     created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
        ),
        params![
            booking.id,
            booking.renter_id,
            booking.lender_id,
            booking.listing_id,
            booking.variant_id,
            fmt_date(booking.start_date),
            fmt_date(booking.end_date),
            booking.quantity,
            booking.subtotal,
            booking.deposit_amount,
            booking.total_price,
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.confirmed_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            booking.cancelled_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            booking.completed_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            booking.cancellation_reason,
            booking.stripe_checkout_session_id,
            booking.stripe_payment_intent_id,
            booking.payment_error,
            booking.version,
            booking.created_at.format(TIMESTAMP_FORMAT).to_string(),
            booking.updated_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_booking_by_payment_intent(
    conn: &Connection,
    payment_intent_id: &str,
) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE stripe_payment_intent_id = ?1"),
        params![payment_intent_id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_bookings_for_profile(
    conn: &Connection,
    profile_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE renter_id = ?1 OR lender_id IN (SELECT id FROM lender_profiles WHERE profile_id = ?1)
         ORDER BY start_date DESC LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![profile_id, limit], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Moves a booking from `from` to `to` only if nobody else touched the row
/// since `expected_version` was read.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    expected_version: i64,
    reason: Option<&str>,
) -> anyhow::Result<bool> {
    let stamp = match to {
        BookingStatus::Confirmed => ", confirmed_at = ?2",
        BookingStatus::Cancelled => ", cancelled_at = ?2",
        BookingStatus::Completed => ", completed_at = ?2",
        BookingStatus::Pending | BookingStatus::Active => "",
    };
    let sql = format!(
        "UPDATE bookings
         SET status = ?1, updated_at = ?2, version = version + 1,
             cancellation_reason = COALESCE(?3, cancellation_reason){stamp}
         WHERE id = ?4 AND status = ?5 AND version = ?6"
    );
    let count = conn.execute(
        &sql,
        params![to.as_str(), now(), reason, id, from.as_str(), expected_version],
    )?;
    Ok(count > 0)
}

/// Attaches a hosted session to a still-unpaid pending booking, only if the
/// row is unchanged since `expected_version` was read.
pub fn set_checkout_session(
    conn: &Connection,
    id: &str,
    session_id: &str,
    payment_intent_id: Option<&str>,
    expected_version: i64,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET stripe_checkout_session_id = ?1,
             stripe_payment_intent_id = COALESCE(?2, stripe_payment_intent_id),
             updated_at = ?3, version = version + 1
         WHERE id = ?4 AND version = ?5
           AND status = 'pending' AND payment_status IN ('pending', 'failed')",
        params![session_id, payment_intent_id, now(), id, expected_version],
    )?;
    Ok(count > 0)
}

/// Records a completed checkout. A pending booking becomes confirmed in the
/// same statement; any other status is left as it is. Only a pending or
/// failed payment moves to paid, so a late event cannot undo a refund.
pub fn mark_booking_paid(
    conn: &Connection,
    id: &str,
    session_id: &str,
    payment_intent_id: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET payment_status = CASE WHEN payment_status IN ('pending', 'failed') THEN 'paid'
                                   ELSE payment_status END,
             payment_error = NULL,
             confirmed_at = CASE WHEN status = 'pending' THEN ?1 ELSE confirmed_at END,
             status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END,
             stripe_checkout_session_id = ?2,
             stripe_payment_intent_id = COALESCE(?3, stripe_payment_intent_id),
             updated_at = ?1, version = version + 1
         WHERE id = ?4",
        params![now(), session_id, payment_intent_id, id],
    )?;
    Ok(count > 0)
}

pub fn set_payment_intent(conn: &Connection, id: &str, payment_intent_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET stripe_payment_intent_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![payment_intent_id, now(), id],
    )?;
    Ok(count > 0)
}

pub fn set_payment_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
    payment_error: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings
         SET payment_status = ?1, payment_error = ?2, updated_at = ?3, version = version + 1
         WHERE id = ?4",
        params![status.as_str(), payment_error, now(), id],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let start_date: String = row.get(5)?;
    let end_date: String = row.get(6)?;
    let status: String = row.get(11)?;
    let payment_status: String = row.get(12)?;
    let created_at: String = row.get(21)?;
    let updated_at: String = row.get(22)?;

    Ok(Booking {
        id: row.get(0)?,
        renter_id: row.get(1)?,
        lender_id: row.get(2)?,
        listing_id: row.get(3)?,
        variant_id: row.get(4)?,
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        quantity: row.get(7)?,
        subtotal: row.get(8)?,
        deposit_amount: row.get(9)?,
        total_price: row.get(10)?,
        status: BookingStatus::parse(&status)
            .with_context(|| format!("unknown booking status: {status}"))?,
        payment_status: PaymentStatus::parse(&payment_status)
            .with_context(|| format!("unknown payment status: {payment_status}"))?,
        confirmed_at: parse_opt_timestamp(row.get(13)?)?,
        cancelled_at: parse_opt_timestamp(row.get(14)?)?,
        completed_at: parse_opt_timestamp(row.get(15)?)?,
        cancellation_reason: row.get(16)?,
        stripe_checkout_session_id: row.get(17)?,
        stripe_payment_intent_id: row.get(18)?,
        payment_error: row.get(19)?,
        version: row.get(20)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

// ── Booking Add-ons & Deposits ──

pub fn insert_booking_add_on(conn: &Connection, add_on: &BookingAddOn) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO booking_add_ons (booking_id, add_on_id, name, unit_price, quantity)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            add_on.booking_id,
            add_on.add_on_id,
            add_on.name,
            add_on.unit_price,
            add_on.quantity,
        ],
    )?;
    Ok(())
}

pub fn get_booking_add_ons(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<BookingAddOn>> {
    let mut stmt = conn.prepare(
        "SELECT booking_id, add_on_id, name, unit_price, quantity
         FROM booking_add_ons WHERE booking_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok(BookingAddOn {
            booking_id: row.get(0)?,
            add_on_id: row.get(1)?,
            name: row.get(2)?,
            unit_price: row.get(3)?,
            quantity: row.get(4)?,
        })
    })?;

    let mut add_ons = vec![];
    for row in rows {
        add_ons.push(row?);
    }
    Ok(add_ons)
}

pub fn insert_booking_deposit(conn: &Connection, deposit: &BookingDeposit) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO booking_deposits (booking_id, amount, status) VALUES (?1, ?2, ?3)",
        params![deposit.booking_id, deposit.amount, deposit.status.as_str()],
    )?;
    Ok(())
}

pub fn get_booking_deposit(conn: &Connection, booking_id: &str) -> anyhow::Result<Option<BookingDeposit>> {
    let row = conn
        .query_row(
            "SELECT booking_id, amount, status, refunded_at FROM booking_deposits WHERE booking_id = ?1",
            params![booking_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((booking_id, amount, status, refunded_at)) => Ok(Some(BookingDeposit {
            booking_id,
            amount,
            status: DepositStatus::parse(&status)
                .with_context(|| format!("unknown deposit status: {status}"))?,
            refunded_at: parse_opt_timestamp(refunded_at)?,
        })),
        None => Ok(None),
    }
}

pub fn refund_booking_deposit(conn: &Connection, booking_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_deposits SET status = 'refunded', refunded_at = ?1
         WHERE booking_id = ?2 AND status = 'held'",
        params![now(), booking_id],
    )?;
    Ok(count > 0)
}

// ── Refunds ──

/// Returns false when a refund with the same processor id already exists.
pub fn insert_refund(conn: &Connection, refund: &Refund) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO refunds (id, booking_id, amount, reason, status, stripe_refund_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            refund.id,
            refund.booking_id,
            refund.amount,
            refund.reason,
            refund.status.as_str(),
            refund.stripe_refund_id,
            refund.created_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_refunds_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<Refund>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, amount, reason, status, stripe_refund_id, created_at
         FROM refunds WHERE booking_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut refunds = vec![];
    for row in rows {
        let (id, booking_id, amount, reason, status, stripe_refund_id, created_at) = row?;
        refunds.push(Refund {
            id,
            booking_id,
            amount,
            reason,
            status: RefundStatus::parse(&status)
                .with_context(|| format!("unknown refund status: {status}"))?,
            stripe_refund_id,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(refunds)
}

// ── Payouts ──

pub fn upsert_payout(conn: &Connection, payout: &Payout) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payouts (id, lender_id, amount, currency, status, stripe_payout_id, failure_message, arrival_date, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(stripe_payout_id) DO UPDATE SET
           status = excluded.status,
           failure_message = excluded.failure_message,
           arrival_date = COALESCE(excluded.arrival_date, arrival_date),
           updated_at = excluded.updated_at",
        params![
            payout.id,
            payout.lender_id,
            payout.amount,
            payout.currency,
            payout.status.as_str(),
            payout.stripe_payout_id,
            payout.failure_message,
            payout.arrival_date,
            payout.updated_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_payout_by_stripe_id(conn: &Connection, stripe_payout_id: &str) -> anyhow::Result<Option<Payout>> {
    let row = conn
        .query_row(
            "SELECT id, lender_id, amount, currency, status, stripe_payout_id, failure_message, arrival_date, updated_at
             FROM payouts WHERE stripe_payout_id = ?1",
            params![stripe_payout_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, lender_id, amount, currency, status, stripe_payout_id, failure_message, arrival_date, updated_at)) => {
            Ok(Some(Payout {
                id,
                lender_id,
                amount,
                currency,
                status: PayoutStatus::parse(&status)
                    .with_context(|| format!("unknown payout status: {status}"))?,
                stripe_payout_id,
                failure_message,
                arrival_date,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        }
        None => Ok(None),
    }
}

// ── Webhook Events ──

const WEBHOOK_COLUMNS: &str =
    "id, stripe_event_id, event_type, payload, processed, processing_error, received_at, processed_at";

fn webhook_event_from_row(row: &rusqlite::Row) -> rusqlite::Result<WebhookEvent> {
    Ok(WebhookEvent {
        id: row.get(0)?,
        stripe_event_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        processed: row.get::<_, i32>(4)? != 0,
        processing_error: row.get(5)?,
        received_at: row.get(6)?,
        processed_at: row.get(7)?,
    })
}

/// Appends an event to the log. A redelivered event id keeps its original
/// row; the stored row is returned either way.
pub fn record_webhook_event(
    conn: &Connection,
    stripe_event_id: &str,
    event_type: &str,
    payload: &str,
) -> anyhow::Result<WebhookEvent> {
    conn.execute(
        "INSERT OR IGNORE INTO webhook_events (stripe_event_id, event_type, payload, received_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![stripe_event_id, event_type, payload, now()],
    )?;

    let event = conn.query_row(
        &format!("SELECT {WEBHOOK_COLUMNS} FROM webhook_events WHERE stripe_event_id = ?1"),
        params![stripe_event_id],
        webhook_event_from_row,
    )?;
    Ok(event)
}

pub fn mark_webhook_processed(conn: &Connection, stripe_event_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE webhook_events SET processed = 1, processing_error = NULL, processed_at = ?1
         WHERE stripe_event_id = ?2",
        params![now(), stripe_event_id],
    )?;
    Ok(())
}

pub fn mark_webhook_failed(conn: &Connection, stripe_event_id: &str, error: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE webhook_events SET processed = 0, processing_error = ?1 WHERE stripe_event_id = ?2",
        params![error, stripe_event_id],
    )?;
    Ok(())
}

pub fn list_webhook_events(
    conn: &Connection,
    processed: Option<bool>,
    limit: i64,
) -> anyhow::Result<Vec<WebhookEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhook_events
         WHERE ?1 IS NULL OR processed = ?1
         ORDER BY id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![processed, limit], webhook_event_from_row)?;

    let mut events = vec![];
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ── Payment Audit Log ──

pub fn insert_audit_entry(
    conn: &Connection,
    booking_id: Option<&str>,
    lender_id: Option<&str>,
    event: &str,
    details: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payment_audit_log (booking_id, lender_id, event, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![booking_id, lender_id, event, details.to_string(), now()],
    )?;
    Ok(())
}

pub fn get_audit_entries_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Vec<PaymentAuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_id, lender_id, event, details, created_at
         FROM payment_audit_log WHERE booking_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut entries = vec![];
    for row in rows {
        let (id, booking_id, lender_id, event, details, created_at) = row?;
        entries.push(PaymentAuditEntry {
            id,
            booking_id,
            lender_id,
            event,
            details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
            created_at,
        });
    }
    Ok(entries)
}
