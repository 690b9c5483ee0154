//! In-memory implementations of the collaborator ports.
//!
//! They back the demo binary and the tests. Each adapter keeps its state behind a `Mutex` and
//! pushes notifications on a `broadcast` channel, the same way a real manager would.

use crate::collaborators::{
	AccountDirectory, AccountEvent, PreferenceStore, RateAppNotifier, RateEvent, RateOracle,
	SortTypeSource, WalletDirectory,
};
use crate::portfolio::types::{
	Account, ActiveWallet, CoinType, Currency, PortfolioError, RateItem, SortType, Wallet,
};

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

const NOTIFICATION_CAPACITY: usize = 64;

/// Rate oracle holding one rate table per currency code
pub struct InMemoryRateOracle {
	currency: Mutex<Currency>,
	rates: Mutex<HashMap<String, HashMap<CoinType, RateItem>>>,
	tracked: Mutex<Vec<CoinType>>,
	refreshes: AtomicUsize,
	events: broadcast::Sender<RateEvent>,
}

impl InMemoryRateOracle {
	pub fn new(currency: Currency) -> Self {
		let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
		Self {
			currency: Mutex::new(currency),
			rates: Mutex::new(HashMap::new()),
			tracked: Mutex::new(Vec::new()),
			refreshes: AtomicUsize::new(0),
			events,
		}
	}

	/// Store a rate without notifying anyone.
	pub fn insert_rate(&self, currency_code: &str, coin_type: CoinType, rate_item: RateItem) {
		let mut rates = self.rates.lock().unwrap_or_else(|e| e.into_inner());
		rates
			.entry(currency_code.to_string())
			.or_default()
			.insert(coin_type, rate_item);
	}

	/// Store rates for the current currency and push them.
	pub fn push_rates(&self, updates: HashMap<CoinType, RateItem>) {
		let code = self.currency().code;
		for (coin_type, rate_item) in &updates {
			self.insert_rate(&code, coin_type.clone(), rate_item.clone());
		}
		let _ = self.events.send(RateEvent::RatesUpdated(updates));
	}

	pub fn set_currency(&self, currency: Currency) {
		*self.currency.lock().unwrap_or_else(|e| e.into_inner()) = currency;
		let _ = self.events.send(RateEvent::BaseCurrencyChanged);
	}

	pub fn tracked_coin_types(&self) -> Vec<CoinType> {
		self.tracked.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn refresh_count(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}
}

impl RateOracle for InMemoryRateOracle {
	fn current_rate(&self, coin_type: &CoinType) -> Option<RateItem> {
		let code = self.currency().code;
		let rates = self.rates.lock().unwrap_or_else(|e| e.into_inner());
		rates.get(&code).and_then(|table| table.get(coin_type)).cloned()
	}

	fn currency(&self) -> Currency {
		self.currency.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	fn set_coin_types(&self, coin_types: Vec<CoinType>) {
		debug!("Tracking rates for {} coin types", coin_types.len());
		*self.tracked.lock().unwrap_or_else(|e| e.into_inner()) = coin_types;
	}

	fn refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::SeqCst);
	}

	fn subscribe(&self) -> broadcast::Receiver<RateEvent> {
		self.events.subscribe()
	}
}

/// Wallet directory holding the active wallet list
pub struct InMemoryWalletDirectory {
	wallets: Mutex<Vec<ActiveWallet>>,
	deleted: Mutex<Vec<Wallet>>,
	refreshes: AtomicUsize,
	events: broadcast::Sender<Vec<ActiveWallet>>,
}

impl InMemoryWalletDirectory {
	pub fn new(wallets: Vec<ActiveWallet>) -> Self {
		let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
		Self {
			wallets: Mutex::new(wallets),
			deleted: Mutex::new(Vec::new()),
			refreshes: AtomicUsize::new(0),
			events,
		}
	}

	/// Replace the active set and announce it.
	pub fn set_active_wallets(&self, wallets: Vec<ActiveWallet>) {
		*self.wallets.lock().unwrap_or_else(|e| e.into_inner()) = wallets.clone();
		let _ = self.events.send(wallets);
	}

	/// Wallets requested for deletion, in request order.
	pub fn deleted_wallets(&self) -> Vec<Wallet> {
		self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn refresh_count(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}
}

impl WalletDirectory for InMemoryWalletDirectory {
	fn active_wallets(&self) -> Vec<ActiveWallet> {
		self.wallets.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	fn subscribe(&self) -> broadcast::Receiver<Vec<ActiveWallet>> {
		self.events.subscribe()
	}

	fn refresh_wallets(&self) {
		self.refreshes.fetch_add(1, Ordering::SeqCst);
	}

	// Deletion is only recorded. Callers announce the shrunken list themselves.
	fn delete(&self, wallets: &[Wallet]) {
		self.deleted
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.extend_from_slice(wallets);
	}
}

pub struct InMemoryAccountDirectory {
	active: Mutex<Option<Account>>,
	events: broadcast::Sender<AccountEvent>,
}

impl InMemoryAccountDirectory {
	pub fn new(active: Option<Account>) -> Self {
		let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
		Self {
			active: Mutex::new(active),
			events,
		}
	}

	pub fn set_active_account(&self, account: Option<Account>) {
		*self.active.lock().unwrap_or_else(|e| e.into_inner()) = account.clone();
		let _ = self.events.send(AccountEvent::ActiveAccountChanged(account));
	}

	pub fn update_account(&self, account: Account) {
		{
			let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
			if active.as_ref().map(|a| a.id == account.id).unwrap_or(false) {
				*active = Some(account.clone());
			}
		}
		let _ = self.events.send(AccountEvent::AccountUpdated(account));
	}

	pub fn report_accounts_lost(&self, lost: bool) {
		let _ = self.events.send(AccountEvent::AccountsLost(lost));
	}
}

impl AccountDirectory for InMemoryAccountDirectory {
	fn active_account(&self) -> Option<Account> {
		self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
		self.events.subscribe()
	}
}

pub struct InMemorySortTypeSource {
	sort_type: Mutex<SortType>,
	events: broadcast::Sender<SortType>,
}

impl InMemorySortTypeSource {
	pub fn new(sort_type: SortType) -> Self {
		let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
		Self {
			sort_type: Mutex::new(sort_type),
			events,
		}
	}

	pub fn select(&self, sort_type: SortType) {
		*self.sort_type.lock().unwrap_or_else(|e| e.into_inner()) = sort_type;
		let _ = self.events.send(sort_type);
	}
}

impl SortTypeSource for InMemorySortTypeSource {
	fn sort_type(&self) -> SortType {
		*self.sort_type.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn subscribe(&self) -> broadcast::Receiver<SortType> {
		self.events.subscribe()
	}
}

#[derive(Default)]
pub struct InMemoryPreferenceStore {
	balance_hidden: AtomicBool,
}

impl InMemoryPreferenceStore {
	pub fn new(balance_hidden: bool) -> Self {
		Self {
			balance_hidden: AtomicBool::new(balance_hidden),
		}
	}
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
	async fn balance_hidden(&self) -> Result<bool, PortfolioError> {
		Ok(self.balance_hidden.load(Ordering::SeqCst))
	}

	async fn set_balance_hidden(&self, hidden: bool) -> Result<(), PortfolioError> {
		self.balance_hidden.store(hidden, Ordering::SeqCst);
		Ok(())
	}
}

/// Counts balance page appearances
#[derive(Default)]
pub struct CountingRateAppNotifier {
	appeared: AtomicUsize,
	disappeared: AtomicUsize,
}

impl CountingRateAppNotifier {
	pub fn appeared(&self) -> usize {
		self.appeared.load(Ordering::SeqCst)
	}

	pub fn disappeared(&self) -> usize {
		self.disappeared.load(Ordering::SeqCst)
	}
}

impl RateAppNotifier for CountingRateAppNotifier {
	fn on_balance_page_appear(&self) {
		self.appeared.fetch_add(1, Ordering::SeqCst);
	}

	fn on_balance_page_disappear(&self) {
		self.disappeared.fetch_add(1, Ordering::SeqCst);
	}
}
