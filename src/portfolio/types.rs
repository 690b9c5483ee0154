//! Data model shared by the portfolio engine and its collaborators.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Blockchain-level identity of a coin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CoinType {
	Bitcoin,
	BitcoinCash,
	Litecoin,
	Dash,
	Zcash,
	Ethereum,
	BinanceSmartChain,
	Erc20 { address: String },
	Bep20 { address: String },
	Bep2 { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
	pub title: String,
	pub code: String,
	pub decimals: u8,
	pub coin_type: CoinType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	pub id: String,
	pub name: String,
	pub backed_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
	pub code: String,
	pub symbol: String,
	pub decimals: u8,
}

impl Currency {
	pub fn new(code: &str, symbol: &str, decimals: u8) -> Self {
		Self {
			code: code.to_string(),
			symbol: symbol.to_string(),
			decimals,
		}
	}
}

/// A coin held within a specific account. Equality is the wallet identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wallet {
	pub account_id: String,
	pub coin: Coin,
}

impl Wallet {
	pub fn new(account_id: impl Into<String>, coin: Coin) -> Self {
		Self {
			account_id: account_id.into(),
			coin,
		}
	}

	pub fn coin_type(&self) -> &CoinType {
		&self.coin.coin_type
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceData {
	pub balance: Decimal,
	pub balance_locked: Decimal,
}

impl BalanceData {
	pub fn new(balance: Decimal) -> Self {
		Self {
			balance,
			balance_locked: Decimal::ZERO,
		}
	}

	/// Spendable plus locked balance, `None` when the sum does not fit in a `Decimal`.
	pub fn total(&self) -> Option<Decimal> {
		self.balance.checked_add(self.balance_locked)
	}
}

/// Blockchain synchronization status of a single wallet adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncState {
	Synced,
	Syncing {
		progress: u8,
		last_block_date: Option<DateTime<Utc>>,
	},
	SearchingTxs {
		count: u32,
	},
	NotSynced {
		error: String,
	},
}

impl SyncState {
	pub fn is_synced(&self) -> bool {
		matches!(self, SyncState::Synced)
	}
}

/// Price snapshot for one coin in the current base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateItem {
	pub rate: Decimal,
	/// 24h change in percent, when the oracle knows it.
	pub diff: Option<Decimal>,
	/// The rate is stale and totals built from it must be flagged.
	pub expired: bool,
}

impl RateItem {
	pub fn new(rate: Decimal, expired: bool) -> Self {
		Self {
			rate,
			diff: None,
			expired,
		}
	}
}

/// Engine-assigned identity of a portfolio item. Stable across in-place updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

/// Per-wallet record owned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
	pub id: ItemId,
	pub wallet: Wallet,
	pub is_main_net: bool,
	pub balance_data: BalanceData,
	pub state: SyncState,
	pub rate_item: Option<RateItem>,
	/// Index of the wallet in the directory's announced list.
	pub position: usize,
}

impl PortfolioItem {
	/// Fiat value of the wallet, or `None` when no rate is known or the value overflows.
	pub fn fiat_value(&self) -> Option<Decimal> {
		let rate_item = self.rate_item.as_ref()?;
		self.balance_data.total()?.checked_mul(rate_item.rate)
	}
}

/// Derived total of the whole portfolio in the base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalItem {
	pub amount: Decimal,
	pub currency: Currency,
	pub expired: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortType {
	#[default]
	Value,
	Name,
	PercentGrowth,
	Manual,
}

/// One independently changing facet of an active wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "facet", content = "value", rename_all = "camelCase")]
pub enum WalletFacet {
	NetworkType(bool),
	Balance(BalanceData),
	State(SyncState),
}

impl WalletFacet {
	pub fn kind(&self) -> &'static str {
		match self {
			WalletFacet::NetworkType(_) => "network-type",
			WalletFacet::Balance(_) => "balance",
			WalletFacet::State(_) => "state",
		}
	}
}

/// Live handle on a wallet enabled for the active account.
///
/// The facets are observed through `watch` receivers owned by the wallet directory. The engine
/// only reads them.
#[derive(Debug, Clone)]
pub struct ActiveWallet {
	pub wallet: Wallet,
	pub is_main_net: watch::Receiver<bool>,
	pub balance_data: watch::Receiver<BalanceData>,
	pub state: watch::Receiver<SyncState>,
}

impl ActiveWallet {
	pub fn new(
		wallet: Wallet,
		is_main_net: watch::Receiver<bool>,
		balance_data: watch::Receiver<BalanceData>,
		state: watch::Receiver<SyncState>,
	) -> Self {
		Self {
			wallet,
			is_main_net,
			balance_data,
			state,
		}
	}

	/// Create an active wallet together with the feed that drives its facets.
	pub fn channel(
		wallet: Wallet,
		is_main_net: bool,
		balance_data: BalanceData,
		state: SyncState,
	) -> (Self, WalletFeed) {
		let (is_main_net_tx, is_main_net_rx) = watch::channel(is_main_net);
		let (balance_tx, balance_rx) = watch::channel(balance_data);
		let (state_tx, state_rx) = watch::channel(state);

		let active = Self::new(wallet.clone(), is_main_net_rx, balance_rx, state_rx);
		let feed = WalletFeed {
			wallet,
			is_main_net: is_main_net_tx,
			balance_data: balance_tx,
			state: state_tx,
		};
		(active, feed)
	}
}

/// Producer side of an [`ActiveWallet`], held by whoever owns the wallet adapter.
#[derive(Debug)]
pub struct WalletFeed {
	pub wallet: Wallet,
	is_main_net: watch::Sender<bool>,
	balance_data: watch::Sender<BalanceData>,
	state: watch::Sender<SyncState>,
}

impl WalletFeed {
	pub fn set_main_net(&self, is_main_net: bool) {
		self.is_main_net.send_replace(is_main_net);
	}

	pub fn set_balance(&self, balance_data: BalanceData) {
		self.balance_data.send_replace(balance_data);
	}

	pub fn set_state(&self, state: SyncState) {
		self.state.send_replace(state);
	}
}

/// Errors surfaced by handle-side calls. Event processing itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
	#[error("Portfolio engine has stopped")]
	EngineStopped,

	#[error("Preference store error: {0}")]
	Persistence(String),
}
