//! Slippage measurement.

use rust_decimal::Decimal;

/// Relative gap between the fill price and the reference price, in percent.
///
/// Zero when no fill price is known or the reference is missing or zero.
/// Saturates at `Decimal::MAX` when the ratio is out of range.
pub fn calculate_slippage(fill_price: Option<Decimal>, reference_price: Option<Decimal>) -> Decimal {
    match (fill_price, reference_price) {
        (Some(fill), Some(reference)) if !reference.is_zero() => fill
            .checked_sub(reference)
            .and_then(|gap| gap.checked_div(reference))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map_or(Decimal::MAX, |percent| percent.abs()),
        _ => Decimal::ZERO,
    }
}
