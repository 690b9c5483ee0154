use crate::portfolio::types::Currency;

use rust_decimal::{Decimal, RoundingStrategy};

pub fn format_fiat_amount(amount: Decimal, currency: &Currency) -> String {
    let rounded =
        amount.round_dp_with_strategy(currency.decimals as u32, RoundingStrategy::MidpointAwayFromZero);
    format!(
        "{}{:.*}",
        currency.symbol,
        currency.decimals as usize,
        rounded
    )
}
