//! Store access split by bounded context. Handlers and services only see
//! these traits; `SqliteRepository` is the production implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};

use super::queries;
use crate::models::{
    Booking, BookingAddOn, BookingDeposit, BookingStatus, LenderProfile, Listing, ListingAddOn,
    ListingVariant, PaymentAuditEntry, PaymentStatus, Payout, Profile, Refund, WebhookEvent,
};

pub trait ListingRepository: Send + Sync {
    fn get_listing(&self, id: &str) -> anyhow::Result<Option<Listing>>;
    fn get_variant(&self, id: &str) -> anyhow::Result<Option<ListingVariant>>;
    fn get_listing_add_ons(&self, listing_id: &str) -> anyhow::Result<Vec<ListingAddOn>>;
    fn get_lender(&self, id: &str) -> anyhow::Result<Option<LenderProfile>>;
    fn get_lender_by_stripe_account(&self, stripe_account_id: &str) -> anyhow::Result<Option<LenderProfile>>;
    fn get_profile(&self, id: &str) -> anyhow::Result<Option<Profile>>;
    fn booked_quantity(
        &self,
        listing_id: &str,
        variant_id: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<i64>;
    fn blocked_dates(&self, listing_id: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<i64>;
}

pub trait BookingRepository: Send + Sync {
    /// Inserts the booking with its add-on and deposit rows atomically.
    /// Overlapping reservations are recounted in the same write transaction;
    /// returns false (and writes nothing) when `stock` would be exceeded.
    fn create_booking(
        &self,
        booking: &Booking,
        add_ons: &[BookingAddOn],
        deposit: Option<&BookingDeposit>,
        stock: i64,
    ) -> anyhow::Result<bool>;
    fn get_booking(&self, id: &str) -> anyhow::Result<Option<Booking>>;
    fn get_booking_by_payment_intent(&self, payment_intent_id: &str) -> anyhow::Result<Option<Booking>>;
    fn list_bookings_for_profile(&self, profile_id: &str, limit: i64) -> anyhow::Result<Vec<Booking>>;
    fn get_booking_add_ons(&self, booking_id: &str) -> anyhow::Result<Vec<BookingAddOn>>;
    fn get_booking_deposit(&self, booking_id: &str) -> anyhow::Result<Option<BookingDeposit>>;
    /// Conditional status change. Returns false when the row no longer has
    /// status `from` at `expected_version`.
    fn transition(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        expected_version: i64,
        reason: Option<&str>,
    ) -> anyhow::Result<bool>;
    /// Returns false when the booking changed since `expected_version`.
    fn attach_checkout_session(
        &self,
        id: &str,
        session_id: &str,
        payment_intent_id: Option<&str>,
        expected_version: i64,
    ) -> anyhow::Result<bool>;
    fn insert_refund(&self, refund: &Refund) -> anyhow::Result<bool>;
    fn get_refunds(&self, booking_id: &str) -> anyhow::Result<Vec<Refund>>;
}

/// A single store mutation produced by a reconciled payment event.
#[derive(Debug, Clone)]
pub enum PaymentUpdate {
    CheckoutCompleted {
        booking_id: String,
        session_id: String,
        payment_intent_id: Option<String>,
    },
    PaymentIntentRecorded {
        booking_id: String,
        payment_intent_id: String,
    },
    PaymentStatusChanged {
        booking_id: String,
        status: PaymentStatus,
        error: Option<String>,
    },
    ChargeRefunded {
        booking_id: String,
        status: PaymentStatus,
        refunds: Vec<Refund>,
    },
    LenderAccountUpdated {
        stripe_account_id: String,
        charges_enabled: bool,
        payouts_enabled: bool,
        details_submitted: bool,
    },
    PayoutUpdated {
        payout: Payout,
    },
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub booking_id: Option<String>,
    pub lender_id: Option<String>,
    pub event: String,
    pub details: serde_json::Value,
}

pub trait PaymentRepository: Send + Sync {
    fn record_webhook_event(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        payload: &str,
    ) -> anyhow::Result<WebhookEvent>;
    fn mark_webhook_processed(&self, stripe_event_id: &str) -> anyhow::Result<()>;
    fn mark_webhook_failed(&self, stripe_event_id: &str, error: &str) -> anyhow::Result<()>;
    fn list_webhook_events(&self, processed: Option<bool>, limit: i64) -> anyhow::Result<Vec<WebhookEvent>>;
    /// Applies the update and writes the audit row in one transaction.
    /// Returns false (and writes nothing) when the target row is missing.
    fn apply_payment_update(&self, update: &PaymentUpdate, audit: &AuditRecord) -> anyhow::Result<bool>;
    fn get_audit_entries(&self, booking_id: &str) -> anyhow::Result<Vec<PaymentAuditEntry>>;
    fn get_payout(&self, stripe_payout_id: &str) -> anyhow::Result<Option<Payout>>;
}

#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))
    }

    /// Direct access for seeding catalog data and for maintenance tasks.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }
}

impl ListingRepository for SqliteRepository {
    fn get_listing(&self, id: &str) -> anyhow::Result<Option<Listing>> {
        queries::get_listing(&*self.lock()?, id)
    }

    fn get_variant(&self, id: &str) -> anyhow::Result<Option<ListingVariant>> {
        queries::get_variant(&*self.lock()?, id)
    }

    fn get_listing_add_ons(&self, listing_id: &str) -> anyhow::Result<Vec<ListingAddOn>> {
        queries::get_listing_add_ons(&*self.lock()?, listing_id)
    }

    fn get_lender(&self, id: &str) -> anyhow::Result<Option<LenderProfile>> {
        queries::get_lender_profile(&*self.lock()?, id)
    }

    fn get_lender_by_stripe_account(&self, stripe_account_id: &str) -> anyhow::Result<Option<LenderProfile>> {
        queries::get_lender_by_stripe_account(&*self.lock()?, stripe_account_id)
    }

    fn get_profile(&self, id: &str) -> anyhow::Result<Option<Profile>> {
        queries::get_profile(&*self.lock()?, id)
    }

    fn booked_quantity(
        &self,
        listing_id: &str,
        variant_id: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<i64> {
        queries::booked_quantity(&*self.lock()?, listing_id, variant_id, start, end)
    }

    fn blocked_dates(&self, listing_id: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<i64> {
        queries::count_blocked_dates(&*self.lock()?, listing_id, start, end)
    }
}

impl BookingRepository for SqliteRepository {
    fn create_booking(
        &self,
        booking: &Booking,
        add_ons: &[BookingAddOn],
        deposit: Option<&BookingDeposit>,
        stock: i64,
    ) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let reserved = queries::booked_quantity(
            &tx,
            &booking.listing_id,
            booking.variant_id.as_deref(),
            booking.start_date,
            booking.end_date,
        )?;
        if reserved + booking.quantity > stock {
            return Ok(false);
        }

        queries::insert_booking(&tx, booking)?;
        for add_on in add_ons {
            queries::insert_booking_add_on(&tx, add_on)?;
        }
        if let Some(deposit) = deposit {
            queries::insert_booking_deposit(&tx, deposit)?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn get_booking(&self, id: &str) -> anyhow::Result<Option<Booking>> {
        queries::get_booking_by_id(&*self.lock()?, id)
    }

    fn get_booking_by_payment_intent(&self, payment_intent_id: &str) -> anyhow::Result<Option<Booking>> {
        queries::get_booking_by_payment_intent(&*self.lock()?, payment_intent_id)
    }

    fn list_bookings_for_profile(&self, profile_id: &str, limit: i64) -> anyhow::Result<Vec<Booking>> {
        queries::get_bookings_for_profile(&*self.lock()?, profile_id, limit)
    }

    fn get_booking_add_ons(&self, booking_id: &str) -> anyhow::Result<Vec<BookingAddOn>> {
        queries::get_booking_add_ons(&*self.lock()?, booking_id)
    }

    fn get_booking_deposit(&self, booking_id: &str) -> anyhow::Result<Option<BookingDeposit>> {
        queries::get_booking_deposit(&*self.lock()?, booking_id)
    }

    fn transition(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
        expected_version: i64,
        reason: Option<&str>,
    ) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !queries::update_booking_status(&tx, id, from, to, expected_version, reason)? {
            return Ok(false);
        }
        if to == BookingStatus::Completed {
            queries::refund_booking_deposit(&tx, id)?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn attach_checkout_session(
        &self,
        id: &str,
        session_id: &str,
        payment_intent_id: Option<&str>,
        expected_version: i64,
    ) -> anyhow::Result<bool> {
        queries::set_checkout_session(&*self.lock()?, id, session_id, payment_intent_id, expected_version)
    }

    fn insert_refund(&self, refund: &Refund) -> anyhow::Result<bool> {
        queries::insert_refund(&*self.lock()?, refund)
    }

    fn get_refunds(&self, booking_id: &str) -> anyhow::Result<Vec<Refund>> {
        queries::get_refunds_for_booking(&*self.lock()?, booking_id)
    }
}

impl PaymentRepository for SqliteRepository {
    fn record_webhook_event(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        payload: &str,
    ) -> anyhow::Result<WebhookEvent> {
        queries::record_webhook_event(&*self.lock()?, stripe_event_id, event_type, payload)
    }

    fn mark_webhook_processed(&self, stripe_event_id: &str) -> anyhow::Result<()> {
        queries::mark_webhook_processed(&*self.lock()?, stripe_event_id)
    }

    fn mark_webhook_failed(&self, stripe_event_id: &str, error: &str) -> anyhow::Result<()> {
        queries::mark_webhook_failed(&*self.lock()?, stripe_event_id, error)
    }

    fn list_webhook_events(&self, processed: Option<bool>, limit: i64) -> anyhow::Result<Vec<WebhookEvent>> {
        queries::list_webhook_events(&*self.lock()?, processed, limit)
    }

    fn apply_payment_update(&self, update: &PaymentUpdate, audit: &AuditRecord) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let applied = match update {
            PaymentUpdate::CheckoutCompleted {
                booking_id,
                session_id,
                payment_intent_id,
            } => queries::mark_booking_paid(&tx, booking_id, session_id, payment_intent_id.as_deref())?,
            PaymentUpdate::PaymentIntentRecorded {
                booking_id,
                payment_intent_id,
            } => queries::set_payment_intent(&tx, booking_id, payment_intent_id)?,
            PaymentUpdate::PaymentStatusChanged {
                booking_id,
                status,
                error,
            } => queries::set_payment_status(&tx, booking_id, *status, error.as_deref())?,
            PaymentUpdate::ChargeRefunded {
                booking_id,
                status,
                refunds,
            } => {
                for refund in refunds {
                    queries::insert_refund(&tx, refund)?;
                }
                queries::set_payment_status(&tx, booking_id, *status, None)?
            }
            PaymentUpdate::LenderAccountUpdated {
                stripe_account_id,
                charges_enabled,
                payouts_enabled,
                details_submitted,
            } => queries::update_lender_account_flags(
                &tx,
                stripe_account_id,
                *charges_enabled,
                *payouts_enabled,
                *details_submitted,
            )?,
            PaymentUpdate::PayoutUpdated { payout } => {
                queries::upsert_payout(&tx, payout)?;
                true
            }
        };

        if !applied {
            return Ok(false);
        }

        queries::insert_audit_entry(
            &tx,
            audit.booking_id.as_deref(),
            audit.lender_id.as_deref(),
            &audit.event,
            &audit.details,
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn get_audit_entries(&self, booking_id: &str) -> anyhow::Result<Vec<PaymentAuditEntry>> {
        queries::get_audit_entries_for_booking(&*self.lock()?, booking_id)
    }

    fn get_payout(&self, stripe_payout_id: &str) -> anyhow::Result<Option<Payout>> {
        queries::get_payout_by_stripe_id(&*self.lock()?, stripe_payout_id)
    }
}
