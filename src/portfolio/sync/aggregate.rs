//! Derivation of the portfolio total.
//!
//! The total is always re-derived from the full item list. It is never patched incrementally.

use crate::portfolio::types::{Currency, PortfolioItem, TotalItem};

use rust_decimal::Decimal;
use tracing::warn;

/// Sum the fiat value of every priced item and flag the result as expired when any item is
/// unpriced, priced with a stale rate, or not fully synced.
///
/// An item whose value does not fit in a `Decimal` is left out of the sum and also flags the
/// total as expired.
pub fn total_item(items: &[PortfolioItem], currency: &Currency) -> TotalItem {
    let mut amount = Decimal::ZERO;
    let mut expired = false;

    for item in items {
        match &item.rate_item {
            Some(rate_item) => {
                match item.fiat_value().and_then(|value| amount.checked_add(value)) {
                    Some(sum) => amount = sum,
                    None => {
                        warn!(
                            "Value of {} overflows, leaving it out of the total",
                            item.wallet.coin.code
                        );
                        expired = true;
                    }
                }
                if rate_item.expired {
                    expired = true;
                }
            }
            None => expired = true,
        }

        if !item.state.is_synced() {
            expired = true;
        }
    }

    TotalItem {
        amount,
        currency: currency.clone(),
        expired,
    }
}
