//! Sort policy for portfolio items.
//!
//! Every ordering is built from `sort_by`, which is stable: items with equal keys keep their
//! existing relative order, so re-sorting an already sorted list never moves anything.

use crate::portfolio::types::{PortfolioItem, SortType};

use rust_decimal::Decimal;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default)]
pub struct WalletSorter;

impl WalletSorter {
    pub fn new() -> Self {
        Self
    }

    /// Sort `items` in place for the given mode.
    pub fn sort(&self, items: &mut Vec<PortfolioItem>, sort_type: SortType) {
        match sort_type {
            SortType::Value => {
                let (mut non_zero, zero): (Vec<_>, Vec<_>) = items
                    .drain(..)
                    .partition(|item| item.balance_data.total() != Some(Decimal::ZERO));

                non_zero.sort_by(|lhs, rhs| Self::value_of(rhs).cmp(&Self::value_of(lhs)));

                items.extend(non_zero);
                items.extend(zero);
            }
            SortType::Name => {
                items.sort_by(|lhs, rhs| {
                    lhs.wallet
                        .coin
                        .title
                        .to_lowercase()
                        .cmp(&rhs.wallet.coin.title.to_lowercase())
                });
            }
            SortType::PercentGrowth => {
                items.sort_by(|lhs, rhs| {
                    let lhs_diff = lhs.rate_item.as_ref().and_then(|r| r.diff);
                    let rhs_diff = rhs.rate_item.as_ref().and_then(|r| r.diff);
                    match (lhs_diff, rhs_diff) {
                        (Some(l), Some(r)) => r.cmp(&l),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                });
            }
            SortType::Manual => {
                items.sort_by_key(|item| item.position);
            }
        }
    }

    fn value_of(item: &PortfolioItem) -> Decimal {
        item.fiat_value().unwrap_or(Decimal::ZERO)
    }
}
