//! Ports the portfolio engine depends on.
//!
//! The engine never reaches for global managers. Everything it needs is injected through these
//! narrow traits: rate lookups and rate pushes, the active wallet set, the active account, the
//! selected sort mode, the hide-balance preference and the balance page visibility hooks.

/// Token to platform coin mapping for fee coins
pub mod fee_coin;
/// In-memory adapters for every port
pub mod memory;

pub use fee_coin::TokenFeeCoinProvider;

use crate::portfolio::types::{
	Account, ActiveWallet, Coin, CoinType, Currency, PortfolioError, RateItem, SortType, Wallet,
};

use std::collections::HashMap;
use tokio::sync::broadcast;

/// Push notifications from the rate oracle
#[derive(Debug, Clone, PartialEq)]
pub enum RateEvent {
	RatesUpdated(HashMap<CoinType, RateItem>),
	BaseCurrencyChanged,
}

/// Push notifications from the account directory
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
	ActiveAccountChanged(Option<Account>),
	AccountUpdated(Account),
	AccountsLost(bool),
}

pub trait RateOracle: Send + Sync {
	/// Current rate for a coin in the current base currency.
	fn current_rate(&self, coin_type: &CoinType) -> Option<RateItem>;

	fn currency(&self) -> Currency;

	/// Restrict rate tracking to the given coin types.
	fn set_coin_types(&self, coin_types: Vec<CoinType>);

	fn refresh(&self);

	fn subscribe(&self) -> broadcast::Receiver<RateEvent>;
}

pub trait WalletDirectory: Send + Sync {
	fn active_wallets(&self) -> Vec<ActiveWallet>;

	fn subscribe(&self) -> broadcast::Receiver<Vec<ActiveWallet>>;

	fn refresh_wallets(&self);

	/// Request removal. The directory announces the new active set when it is done.
	fn delete(&self, wallets: &[Wallet]);
}

pub trait AccountDirectory: Send + Sync {
	fn active_account(&self) -> Option<Account>;

	fn subscribe(&self) -> broadcast::Receiver<AccountEvent>;
}

pub trait SortTypeSource: Send + Sync {
	fn sort_type(&self) -> SortType;

	fn subscribe(&self) -> broadcast::Receiver<SortType>;
}

/// Key-value store holding the hide-balance preference
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
	async fn balance_hidden(&self) -> Result<bool, PortfolioError>;

	async fn set_balance_hidden(&self, hidden: bool) -> Result<(), PortfolioError>;
}

/// Receives balance page visibility changes, used to time the rate-this-app prompt
pub trait RateAppNotifier: Send + Sync {
	fn on_balance_page_appear(&self);

	fn on_balance_page_disappear(&self);
}

pub trait FeeCoinProvider: Send + Sync {
	/// Coin type used to pay network fees for `coin`, when it differs from the coin itself.
	fn fee_coin_type(&self, coin: &Coin) -> Option<CoinType>;
}
