pub mod booking;
pub mod listing;
pub mod payment;
pub mod webhook_event;

pub use booking::{rental_days, Booking, BookingStatus, PaymentStatus};
pub use listing::{CancellationPolicy, LenderProfile, Listing, ListingAddOn, ListingVariant, Profile};
pub use payment::{
    BookingAddOn, BookingDeposit, DepositStatus, PaymentAuditEntry, Payout, PayoutStatus, Refund,
    RefundStatus,
};
pub use webhook_event::WebhookEvent;
