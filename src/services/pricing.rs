use serde::Serialize;

/// Commission kept by the platform, applied to the rental amount only.
pub const PLATFORM_FEE_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct PriceInputs<'a> {
    pub price_per_day: f64,
    pub variant_adjustment_per_day: f64,
    pub duration_days: i64,
    pub quantity: i64,
    pub add_on_prices: &'a [f64],
    pub deposit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub rental: f64,
    pub add_ons: f64,
    pub subtotal: f64,
    pub deposit: f64,
    pub total: f64,
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Major units (stored) to minor units (sent to the processor).
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn quote(inputs: &PriceInputs) -> PriceBreakdown {
    let units = (inputs.duration_days * inputs.quantity) as f64;
    let rental = inputs.price_per_day * units + inputs.variant_adjustment_per_day * units;
    let add_ons: f64 = inputs
        .add_on_prices
        .iter()
        .map(|price| price * inputs.quantity as f64)
        .sum();

    let rental = round_cents(rental);
    let add_ons = round_cents(add_ons);
    let subtotal = round_cents(rental + add_ons);
    let deposit = round_cents(inputs.deposit);

    PriceBreakdown {
        rental,
        add_ons,
        subtotal,
        deposit,
        total: round_cents(subtotal + deposit),
    }
}

/// Amounts in minor units for a hosted checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckoutAmounts {
    pub rental: i64,
    pub deposit: i64,
    pub total: i64,
    pub platform_fee: i64,
    pub lender_net: i64,
}

pub fn platform_fee(rental_minor: i64) -> i64 {
    (rental_minor as f64 * PLATFORM_FEE_RATE).round() as i64
}

pub fn checkout_amounts(subtotal: f64, deposit: f64) -> CheckoutAmounts {
    let rental = to_minor_units(subtotal);
    let deposit = to_minor_units(deposit);
    let total = rental + deposit;
    let platform_fee = platform_fee(rental);

    CheckoutAmounts {
        rental,
        deposit,
        total,
        platform_fee,
        lender_net: total - platform_fee,
    }
}
