use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::db::{AuditRecord, BookingRepository, ListingRepository, PaymentRepository, PaymentUpdate};
use crate::errors::AppResult;
use crate::models::{Booking, BookingStatus, PaymentStatus, Payout, PayoutStatus, Refund, RefundStatus};
use crate::services::payments::stripe::{
    AccountObject, ChargeObject, CheckoutSessionObject, DisputeObject, PaymentIntentObject,
    PayoutObject, StripeEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Event type or target is not ours; acknowledged without changes.
    Ignored,
    /// Redelivery of an event that was already handled.
    AlreadyProcessed,
}

pub struct Reconciler<'a> {
    pub bookings: &'a dyn BookingRepository,
    pub listings: &'a dyn ListingRepository,
    pub payments: &'a dyn PaymentRepository,
}

fn minor_to_major(amount: i64) -> f64 {
    amount as f64 / 100.0
}

impl<'a> Reconciler<'a> {
    /// Logs the raw event, then dispatches it once. A failure is written back
    /// onto the logged event and returned so the processor redelivers.
    pub fn process(&self, event: &StripeEvent, payload: &str) -> AppResult<Outcome> {
        let logged = self
            .payments
            .record_webhook_event(&event.id, &event.event_type, payload)?;

        if logged.processed {
            tracing::info!(event_id = %event.id, event_type = %event.event_type, "duplicate webhook, already processed");
            return Ok(Outcome::AlreadyProcessed);
        }

        match self.dispatch(event) {
            Ok(outcome) => {
                self.payments.mark_webhook_processed(&event.id)?;
                tracing::info!(event_id = %event.id, event_type = %event.event_type, ?outcome, "webhook processed");
                Ok(outcome)
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(event_id = %event.id, event_type = %event.event_type, error = %message, "webhook processing failed");
                if let Err(mark_err) = self.payments.mark_webhook_failed(&event.id, &message) {
                    tracing::error!(error = %mark_err, "failed to record webhook error");
                }
                Err(e.into())
            }
        }
    }

    fn dispatch(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.checkout_completed(event),
            "payment_intent.succeeded" => self.payment_succeeded(event),
            "payment_intent.payment_failed" => self.payment_failed(event),
            "charge.refunded" => self.charge_refunded(event),
            "account.updated" => self.account_updated(event),
            "payout.paid" => self.payout_changed(event, PayoutStatus::Paid),
            "payout.failed" => self.payout_changed(event, PayoutStatus::Failed),
            "charge.dispute.created" => self.dispute_created(event),
            other => {
                tracing::info!(event_type = other, "unhandled webhook event type");
                Ok(Outcome::Ignored)
            }
        }
    }

    fn apply(&self, update: PaymentUpdate, audit: AuditRecord) -> anyhow::Result<Outcome> {
        if !self.payments.apply_payment_update(&update, &audit)? {
            anyhow::bail!("target row for {} disappeared", audit.event);
        }
        Ok(Outcome::Applied)
    }

    /// Finds the booking an event refers to. Explicit `booking_id` metadata
    /// that does not resolve is an error; events without any link are not ours.
    fn resolve_booking(
        &self,
        metadata: &HashMap<String, String>,
        payment_intent: Option<&str>,
    ) -> anyhow::Result<Option<Booking>> {
        if let Some(id) = metadata.get("booking_id") {
            let booking = self
                .bookings
                .get_booking(id)?
                .with_context(|| format!("booking {id} from event metadata not found"))?;
            return Ok(Some(booking));
        }
        match payment_intent {
            Some(pi) => self.bookings.get_booking_by_payment_intent(pi),
            None => Ok(None),
        }
    }

    fn checkout_completed(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let session: CheckoutSessionObject = event.object()?;
        let booking_id = session
            .metadata
            .get("booking_id")
            .context("checkout session has no booking_id metadata")?;
        let booking = self
            .bookings
            .get_booking(booking_id)?
            .with_context(|| format!("booking {booking_id} not found"))?;

        if let Some(status) = session.payment_status.as_deref() {
            if status != "paid" && status != "no_payment_required" {
                tracing::info!(booking_id = %booking.id, payment_status = status, "checkout completed without payment");
                return Ok(Outcome::Ignored);
            }
        }

        if matches!(
            booking.payment_status,
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded | PaymentStatus::Disputed
        ) {
            tracing::warn!(
                booking_id = %booking.id,
                payment_status = booking.payment_status.as_str(),
                "checkout completion arrived after a later payment event, skipping"
            );
            return Ok(Outcome::Ignored);
        }

        if booking.status == BookingStatus::Cancelled {
            tracing::warn!(booking_id = %booking.id, "payment received for a cancelled booking");
        }

        self.apply(
            PaymentUpdate::CheckoutCompleted {
                booking_id: booking.id.clone(),
                session_id: session.id.clone(),
                payment_intent_id: session.payment_intent.clone(),
            },
            AuditRecord {
                booking_id: Some(booking.id.clone()),
                lender_id: Some(booking.lender_id.clone()),
                event: event.event_type.clone(),
                details: json!({
                    "stripe_event_id": event.id,
                    "session_id": session.id,
                    "payment_intent": session.payment_intent,
                    "previous_status": booking.status.as_str(),
                }),
            },
        )
    }

    fn payment_succeeded(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let intent: PaymentIntentObject = event.object()?;
        let Some(booking) = self.resolve_booking(&intent.metadata, Some(&intent.id))? else {
            tracing::warn!(payment_intent = %intent.id, "payment intent not linked to a booking");
            return Ok(Outcome::Ignored);
        };

        self.apply(
            PaymentUpdate::PaymentIntentRecorded {
                booking_id: booking.id.clone(),
                payment_intent_id: intent.id.clone(),
            },
            AuditRecord {
                booking_id: Some(booking.id.clone()),
                lender_id: Some(booking.lender_id.clone()),
                event: event.event_type.clone(),
                details: json!({ "stripe_event_id": event.id, "payment_intent": intent.id }),
            },
        )
    }

    fn payment_failed(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let intent: PaymentIntentObject = event.object()?;
        let Some(booking) = self.resolve_booking(&intent.metadata, Some(&intent.id))? else {
            tracing::warn!(payment_intent = %intent.id, "failed payment intent not linked to a booking");
            return Ok(Outcome::Ignored);
        };

        if !matches!(booking.payment_status, PaymentStatus::Pending | PaymentStatus::Failed) {
            tracing::info!(
                booking_id = %booking.id,
                payment_status = booking.payment_status.as_str(),
                "ignoring failure for a booking that already settled"
            );
            return Ok(Outcome::Ignored);
        }

        let message = intent
            .last_payment_error
            .and_then(|e| e.message)
            .unwrap_or_else(|| "payment failed".to_string());

        self.apply(
            PaymentUpdate::PaymentStatusChanged {
                booking_id: booking.id.clone(),
                status: PaymentStatus::Failed,
                error: Some(message.clone()),
            },
            AuditRecord {
                booking_id: Some(booking.id.clone()),
                lender_id: Some(booking.lender_id.clone()),
                event: event.event_type.clone(),
                details: json!({
                    "stripe_event_id": event.id,
                    "payment_intent": intent.id,
                    "error": message,
                }),
            },
        )
    }

    fn charge_refunded(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let charge: ChargeObject = event.object()?;
        let Some(booking) = self.resolve_booking(&charge.metadata, charge.payment_intent.as_deref())? else {
            tracing::warn!(charge_id = %charge.id, "refunded charge not linked to a booking");
            return Ok(Outcome::Ignored);
        };

        let status = if charge.amount_refunded >= charge.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let now = Utc::now().naive_utc();
        let listed = charge.refunds.map(|r| r.data).unwrap_or_default();
        let refunds: Vec<Refund> = if listed.is_empty() {
            // Older API versions omit the refund list; key the row on the
            // cumulative amount so each refund state is recorded once.
            let recorded: f64 = self
                .bookings
                .get_refunds(&booking.id)?
                .iter()
                .filter(|r| r.stripe_refund_id.is_some())
                .map(|r| r.amount)
                .sum();
            let amount = minor_to_major(charge.amount_refunded) - recorded;
            if amount > 0.0 {
                vec![Refund {
                    id: uuid::Uuid::new_v4().to_string(),
                    booking_id: booking.id.clone(),
                    amount,
                    reason: None,
                    status: RefundStatus::Completed,
                    stripe_refund_id: Some(format!("{}:{}", charge.id, charge.amount_refunded)),
                    created_at: now,
                }]
            } else {
                vec![]
            }
        } else {
            listed
                .into_iter()
                .map(|r| Refund {
                    id: uuid::Uuid::new_v4().to_string(),
                    booking_id: booking.id.clone(),
                    amount: minor_to_major(r.amount),
                    reason: r.reason,
                    status: match r.status.as_deref() {
                        None | Some("succeeded") => RefundStatus::Completed,
                        Some(_) => RefundStatus::Pending,
                    },
                    stripe_refund_id: Some(r.id),
                    created_at: now,
                })
                .collect()
        };

        let refund_ids: Vec<&str> = refunds
            .iter()
            .filter_map(|r| r.stripe_refund_id.as_deref())
            .collect();
        let audit = AuditRecord {
            booking_id: Some(booking.id.clone()),
            lender_id: Some(booking.lender_id.clone()),
            event: event.event_type.clone(),
            details: json!({
                "stripe_event_id": event.id,
                "charge_id": charge.id,
                "amount": charge.amount,
                "amount_refunded": charge.amount_refunded,
                "refund_ids": refund_ids,
                "payment_status": status.as_str(),
            }),
        };

        self.apply(
            PaymentUpdate::ChargeRefunded {
                booking_id: booking.id.clone(),
                status,
                refunds,
            },
            audit,
        )
    }

    fn account_updated(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let account: AccountObject = event.object()?;
        let Some(lender) = self.listings.get_lender_by_stripe_account(&account.id)? else {
            tracing::warn!(account = %account.id, "account update for unknown lender");
            return Ok(Outcome::Ignored);
        };

        self.apply(
            PaymentUpdate::LenderAccountUpdated {
                stripe_account_id: account.id.clone(),
                charges_enabled: account.charges_enabled,
                payouts_enabled: account.payouts_enabled,
                details_submitted: account.details_submitted,
            },
            AuditRecord {
                booking_id: None,
                lender_id: Some(lender.id.clone()),
                event: event.event_type.clone(),
                details: json!({
                    "stripe_event_id": event.id,
                    "account": account.id,
                    "charges_enabled": account.charges_enabled,
                    "payouts_enabled": account.payouts_enabled,
                    "details_submitted": account.details_submitted,
                }),
            },
        )
    }

    fn payout_changed(&self, event: &StripeEvent, status: PayoutStatus) -> anyhow::Result<Outcome> {
        let payout: PayoutObject = event.object()?;
        let existing = self.payments.get_payout(&payout.id)?;

        let lender_id = match (&existing, event.account.as_deref()) {
            (Some(p), _) => Some(p.lender_id.clone()),
            (None, Some(account)) => self
                .listings
                .get_lender_by_stripe_account(account)?
                .map(|l| l.id),
            (None, None) => None,
        };
        let Some(lender_id) = lender_id else {
            tracing::warn!(payout_id = %payout.id, "payout for unknown lender");
            return Ok(Outcome::Ignored);
        };

        let arrival_date = payout
            .arrival_date
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|dt| dt.format(crate::db::DATE_FORMAT).to_string());
        let failure_message = match status {
            PayoutStatus::Failed => payout
                .failure_message
                .clone()
                .or_else(|| Some("payout failed".to_string())),
            _ => None,
        };

        let record = Payout {
            id: existing
                .map(|p| p.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            lender_id: lender_id.clone(),
            amount: minor_to_major(payout.amount),
            currency: payout.currency.to_lowercase(),
            status,
            stripe_payout_id: payout.id.clone(),
            failure_message: failure_message.clone(),
            arrival_date,
            updated_at: Utc::now().naive_utc(),
        };

        self.apply(
            PaymentUpdate::PayoutUpdated { payout: record },
            AuditRecord {
                booking_id: None,
                lender_id: Some(lender_id),
                event: event.event_type.clone(),
                details: json!({
                    "stripe_event_id": event.id,
                    "payout_id": payout.id,
                    "amount": payout.amount,
                    "failure_message": failure_message,
                }),
            },
        )
    }

    fn dispute_created(&self, event: &StripeEvent) -> anyhow::Result<Outcome> {
        let dispute: DisputeObject = event.object()?;
        // Bookings are matched by payment intent only; a dispute without one
        // is recorded as failed for the operator instead of being dropped.
        let payment_intent = dispute.payment_intent.as_deref().with_context(|| {
            format!(
                "dispute {} on charge {} carries no payment intent",
                dispute.id, dispute.charge
            )
        })?;
        let Some(booking) = self.bookings.get_booking_by_payment_intent(payment_intent)? else {
            tracing::warn!(dispute_id = %dispute.id, charge = %dispute.charge, "dispute not linked to a booking");
            return Ok(Outcome::Ignored);
        };

        tracing::warn!(booking_id = %booking.id, dispute_id = %dispute.id, "charge disputed");

        self.apply(
            PaymentUpdate::PaymentStatusChanged {
                booking_id: booking.id.clone(),
                status: PaymentStatus::Disputed,
                error: dispute.reason.clone(),
            },
            AuditRecord {
                booking_id: Some(booking.id.clone()),
                lender_id: Some(booking.lender_id.clone()),
                event: event.event_type.clone(),
                details: json!({
                    "stripe_event_id": event.id,
                    "dispute_id": dispute.id,
                    "charge": dispute.charge,
                    "amount": dispute.amount,
                    "reason": dispute.reason,
                }),
            },
        )
    }
}
