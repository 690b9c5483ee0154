use portfolio_sync::collaborators::{PreferenceStore, TokenFeeCoinProvider};
use portfolio_sync::collaborators::memory::{
	CountingRateAppNotifier, InMemoryAccountDirectory, InMemoryPreferenceStore, InMemoryRateOracle,
	InMemorySortTypeSource, InMemoryWalletDirectory,
};
use portfolio_sync::{
	Account, ActiveWallet, BalanceData, Coin, CoinType, Collaborators, Currency, EngineConfig,
	PortfolioError, PortfolioEvent, PortfolioEventHandler, PortfolioHandle, PortfolioService,
	RateItem, SortType, SyncState, Wallet, WalletFacet, WalletFeed,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
	handle: PortfolioHandle,
	rate_oracle: Arc<InMemoryRateOracle>,
	wallet_directory: Arc<InMemoryWalletDirectory>,
	account_directory: Arc<InMemoryAccountDirectory>,
	sort_type_source: Arc<InMemorySortTypeSource>,
	preference_store: Arc<InMemoryPreferenceStore>,
	notifier: Arc<CountingRateAppNotifier>,
}

struct TestWallet {
	active: ActiveWallet,
	feed: WalletFeed,
}

impl TestWallet {
	fn wallet(&self) -> Wallet {
		self.active.wallet.clone()
	}
}

fn test_wallet(title: &str, coin_type: CoinType, balance: Decimal) -> TestWallet {
	let (active, feed) = ActiveWallet::channel(
		Wallet::new(
			"account-1",
			Coin {
				title: title.to_string(),
				code: title.to_uppercase(),
				decimals: 8,
				coin_type,
			},
		),
		true,
		BalanceData::new(balance),
		SyncState::Synced,
	);
	TestWallet { active, feed }
}

fn account(id: &str, name: &str) -> Account {
	Account {
		id: id.to_string(),
		name: name.to_string(),
		backed_up: false,
	}
}

fn start(wallets: &[&TestWallet], sort_type: SortType) -> Harness {
	start_with_rates(wallets, sort_type, &[])
}

fn start_with_rates(
	wallets: &[&TestWallet],
	sort_type: SortType,
	rates: &[(CoinType, RateItem)],
) -> Harness {
	let rate_oracle = Arc::new(InMemoryRateOracle::new(Currency::new("USD", "$", 2)));
	for (coin_type, rate_item) in rates {
		rate_oracle.insert_rate("USD", coin_type.clone(), rate_item.clone());
	}
	let wallet_directory = Arc::new(InMemoryWalletDirectory::new(
		wallets.iter().map(|w| w.active.clone()).collect(),
	));
	let account_directory = Arc::new(InMemoryAccountDirectory::new(Some(account("1", "Main"))));
	let sort_type_source = Arc::new(InMemorySortTypeSource::new(sort_type));
	let preference_store = Arc::new(InMemoryPreferenceStore::default());
	let notifier = Arc::new(CountingRateAppNotifier::default());

	let handle = PortfolioService::start(
		Collaborators {
			rate_oracle: rate_oracle.clone(),
			wallet_directory: wallet_directory.clone(),
			account_directory: account_directory.clone(),
			sort_type_source: sort_type_source.clone(),
			preference_store: preference_store.clone(),
			rate_app_notifier: notifier.clone(),
			fee_coin_provider: Arc::new(TokenFeeCoinProvider),
		},
		EngineConfig::default(),
	);

	Harness {
		handle,
		rate_oracle,
		wallet_directory,
		account_directory,
		sort_type_source,
		preference_store,
		notifier,
	}
}

/// Three wallets under manual sort: A(10 @ 2), B(5, unpriced), C(1 @ 3, expired rate)
fn three_wallet_fixture() -> (Harness, TestWallet, TestWallet, TestWallet) {
	let a = test_wallet("Litecoin", CoinType::Litecoin, dec!(10));
	let b = test_wallet("Bitcoin", CoinType::Bitcoin, dec!(5));
	let c = test_wallet("Dash", CoinType::Dash, dec!(1));

	let harness = start_with_rates(
		&[&a, &b, &c],
		SortType::Manual,
		&[
			(CoinType::Litecoin, RateItem::new(dec!(2), false)),
			(CoinType::Dash, RateItem::new(dec!(3), true)),
		],
	);

	(harness, a, b, c)
}

fn codes(handle: &PortfolioHandle) -> Vec<String> {
	handle
		.current_items()
		.iter()
		.map(|item| item.wallet.coin.code.clone())
		.collect()
}

fn drain(events: &mut broadcast::Receiver<PortfolioEvent>) -> Vec<PortfolioEvent> {
	let mut drained = Vec::new();
	while let Ok(event) = events.try_recv() {
		drained.push(event);
	}
	drained
}

/// Wait until forwarded notifications have reached the engine and been applied.
async fn eventually<F: Fn() -> bool>(handle: &PortfolioHandle, condition: F) {
	for _ in 0..200 {
		handle.stats().await.unwrap();
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached in time");
}

fn assert_invariants(handle: &PortfolioHandle) {
	let items = handle.current_items();
	let total = handle.current_total_item().expect("total is always derived");

	let expected_amount: Decimal = items
		.iter()
		.filter_map(|item| item.fiat_value())
		.sum();
	let expected_expired = items.iter().any(|item| {
		item.rate_item.as_ref().map(|rate| rate.expired).unwrap_or(true) || !item.state.is_synced()
	});

	assert_eq!(total.amount, expected_amount);
	assert_eq!(total.expired, expected_expired);
}

#[tokio::test]
async fn initial_portfolio_excludes_unpriced_wallets_and_is_expired() {
	let (h, _a, _b, _c) = three_wallet_fixture();

	assert_eq!(codes(&h.handle), vec!["LITECOIN", "BITCOIN", "DASH"]);

	let total = h.handle.current_total_item().unwrap();
	assert_eq!(total.amount, dec!(23));
	assert!(total.expired);
	assert_eq!(total.currency.code, "USD");
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn balance_update_and_sort_change_in_one_batch_are_both_applied() {
	let (h, a, _b, _c) = three_wallet_fixture();

	let (balance, sort) = tokio::join!(
		h.handle
			.wallet_facet_changed(a.wallet(), WalletFacet::Balance(BalanceData::new(dec!(20)))),
		h.handle.sort_type_changed(SortType::Name),
	);
	balance.unwrap();
	sort.unwrap();
	h.handle.stats().await.unwrap();

	assert_eq!(h.handle.current_total_item().unwrap().amount, dec!(43));
	assert_eq!(codes(&h.handle), vec!["BITCOIN", "DASH", "LITECOIN"]);
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn stale_update_for_removed_wallet_has_no_effect() {
	let (h, a, b, c) = three_wallet_fixture();
	let mut events = h.handle.subscribe();

	h.handle
		.active_wallets_changed(vec![a.active.clone(), c.active.clone()])
		.await
		.unwrap();
	assert_eq!(h.handle.item(&b.wallet()).await.unwrap(), None);
	let total_before = h.handle.current_total_item();
	drain(&mut events);

	h.handle
		.wallet_facet_changed(b.wallet(), WalletFacet::Balance(BalanceData::new(dec!(1000))))
		.await
		.unwrap();
	b.feed.set_balance(BalanceData::new(dec!(2000)));
	tokio::time::sleep(Duration::from_millis(20)).await;

	assert_eq!(h.handle.item(&b.wallet()).await.unwrap(), None);
	assert!(drain(&mut events).is_empty());
	assert_eq!(h.handle.current_total_item(), total_before);
	assert_eq!(codes(&h.handle), vec!["LITECOIN", "DASH"]);
}

#[tokio::test]
async fn items_mirror_the_latest_announced_wallet_set() {
	let (h, a, b, c) = three_wallet_fixture();
	let d = test_wallet("Zcash", CoinType::Zcash, dec!(7));

	h.handle
		.active_wallets_changed(vec![c.active.clone()])
		.await
		.unwrap();
	h.handle
		.wallet_facet_changed(a.wallet(), WalletFacet::NetworkType(false))
		.await
		.unwrap();
	h.handle
		.active_wallets_changed(vec![d.active.clone(), b.active.clone(), c.active.clone()])
		.await
		.unwrap();
	h.handle.stats().await.unwrap();

	let announced: HashSet<Wallet> = [d.wallet(), b.wallet(), c.wallet()].into_iter().collect();
	let current: HashSet<Wallet> = h
		.handle
		.current_items()
		.into_iter()
		.map(|item| item.wallet)
		.collect();
	assert_eq!(current, announced);
	assert_eq!(h.handle.current_items().len(), 3);
	assert_eq!(h.handle.item(&a.wallet()).await.unwrap(), None);
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn facet_feed_updates_item_in_place() {
	let (h, a, _b, _c) = three_wallet_fixture();
	let id = h.handle.item(&a.wallet()).await.unwrap().unwrap().id;

	a.feed.set_balance(BalanceData::new(dec!(11)));
	eventually(&h.handle, || {
		h.handle.current_total_item().map(|t| t.amount) == Some(dec!(25))
	})
	.await;

	let item = h.handle.item(&a.wallet()).await.unwrap().unwrap();
	assert_eq!(item.id, id);
	assert_eq!(item.balance_data.balance, dec!(11));
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn total_is_fresh_once_everything_is_priced_and_synced() {
	let a = test_wallet("Bitcoin", CoinType::Bitcoin, dec!(2));
	a.feed.set_state(SyncState::Syncing {
		progress: 50,
		last_block_date: None,
	});
	let h = start(&[&a], SortType::Value);

	assert!(h.handle.current_total_item().unwrap().expired);

	h.handle
		.rates_updated(HashMap::from([(
			CoinType::Bitcoin,
			RateItem::new(dec!(100), false),
		)]))
		.await
		.unwrap();
	h.handle.stats().await.unwrap();
	let total = h.handle.current_total_item().unwrap();
	assert_eq!(total.amount, dec!(200));
	assert!(total.expired);

	h.handle
		.wallet_facet_changed(a.wallet(), WalletFacet::State(SyncState::Synced))
		.await
		.unwrap();
	h.handle.stats().await.unwrap();
	assert!(!h.handle.current_total_item().unwrap().expired);
}

#[tokio::test]
async fn rates_batch_recomputes_total_once() {
	let (h, _a, b, _c) = three_wallet_fixture();
	let mut events = h.handle.subscribe();
	let before = h.handle.stats().await.unwrap();

	h.handle
		.rates_updated(HashMap::from([
			(CoinType::Bitcoin, RateItem::new(dec!(4), false)),
			(CoinType::Dash, RateItem::new(dec!(3), false)),
		]))
		.await
		.unwrap();
	let after = h.handle.stats().await.unwrap();

	assert_eq!(after.total_recomputes - before.total_recomputes, 1);
	assert_eq!(after.item_updates - before.item_updates, 2);

	let events = drain(&mut events);
	let totals = events
		.iter()
		.filter(|e| matches!(e, PortfolioEvent::TotalItemChanged(_)))
		.count();
	assert_eq!(totals, 1);
	assert_eq!(h.handle.current_total_item().unwrap().amount, dec!(43));
	assert!(!h.handle.current_total_item().unwrap().expired);
	assert_eq!(
		h.handle.item(&b.wallet()).await.unwrap().unwrap().rate_item,
		Some(RateItem::new(dec!(4), false))
	);
}

#[tokio::test]
async fn base_currency_change_is_idempotent() {
	let (h, _a, _b, _c) = three_wallet_fixture();
	h.rate_oracle
		.insert_rate("EUR", CoinType::Litecoin, RateItem::new(dec!(1.5), false));
	h.rate_oracle
		.insert_rate("EUR", CoinType::Bitcoin, RateItem::new(dec!(0.5), false));

	h.rate_oracle.set_currency(Currency::new("EUR", "€", 2));
	h.handle.base_currency_changed().await.unwrap();
	h.handle.stats().await.unwrap();
	let first_items = h.handle.current_items();
	let first_total = h.handle.current_total_item();

	h.handle.base_currency_changed().await.unwrap();
	h.handle.stats().await.unwrap();

	assert_eq!(h.handle.current_items(), first_items);
	assert_eq!(h.handle.current_total_item(), first_total);

	let total = first_total.unwrap();
	assert_eq!(total.currency.code, "EUR");
	assert_eq!(total.amount, dec!(17.5));
	assert!(total.expired);
}

#[tokio::test]
async fn resorting_with_equal_keys_keeps_order() {
	let a = test_wallet("Alpha", CoinType::Litecoin, dec!(1));
	let b = test_wallet("Beta", CoinType::Dash, dec!(1));
	let c = test_wallet("Gamma", CoinType::Zcash, dec!(1));
	let h = start(&[&c, &a, &b], SortType::Value);

	assert_eq!(codes(&h.handle), vec!["GAMMA", "ALPHA", "BETA"]);

	h.handle.sort_type_changed(SortType::Value).await.unwrap();
	h.handle.sort_type_changed(SortType::Value).await.unwrap();
	h.handle.stats().await.unwrap();

	assert_eq!(codes(&h.handle), vec!["GAMMA", "ALPHA", "BETA"]);
}

#[tokio::test]
async fn collaborator_notifications_flow_through_the_engine() {
	let a = test_wallet("Bitcoin", CoinType::Bitcoin, dec!(1));
	let b = test_wallet("Dash", CoinType::Dash, dec!(3));
	let h = start(&[&a], SortType::Manual);

	h.wallet_directory
		.set_active_wallets(vec![b.active.clone(), a.active.clone()]);
	eventually(&h.handle, || h.handle.current_items().len() == 2).await;
	assert_eq!(codes(&h.handle), vec!["DASH", "BITCOIN"]);

	h.rate_oracle.push_rates(HashMap::from([
		(CoinType::Bitcoin, RateItem::new(dec!(10), false)),
		(CoinType::Dash, RateItem::new(dec!(2), false)),
	]));
	eventually(&h.handle, || {
		h.handle.current_total_item().map(|t| t.amount) == Some(dec!(16))
	})
	.await;

	h.sort_type_source.select(SortType::Value);
	eventually(&h.handle, || codes(&h.handle) == vec!["BITCOIN", "DASH"]).await;
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn tracks_rates_for_wallet_and_fee_coins() {
	let usdt = CoinType::Erc20 {
		address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
	};
	let a = test_wallet("Tether", usdt.clone(), dec!(1));
	let b = test_wallet("Ethereum", CoinType::Ethereum, dec!(1));
	let h = start(&[&a, &b], SortType::Manual);

	assert_eq!(h.rate_oracle.tracked_coin_types(), vec![usdt, CoinType::Ethereum]);
}

async fn collect_events(
	events: &mut broadcast::Receiver<PortfolioEvent>,
	count: usize,
) -> Vec<PortfolioEvent> {
	let mut seen = Vec::new();
	for _ in 0..200 {
		seen.extend(drain(events));
		if seen.len() >= count {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	seen
}

#[tokio::test]
async fn account_events_are_republished() {
	let h = start(&[], SortType::Value);
	let mut events = h.handle.subscribe();
	let updated_main = Account {
		backed_up: true,
		..account("1", "Main")
	};

	h.account_directory.update_account(account("2", "Other"));
	h.account_directory.update_account(updated_main.clone());
	h.account_directory.report_accounts_lost(false);
	h.account_directory.report_accounts_lost(true);

	assert_eq!(
		collect_events(&mut events, 2).await,
		vec![
			PortfolioEvent::ActiveAccountChanged(Some(updated_main)),
			PortfolioEvent::AccountsLost,
		]
	);

	h.account_directory.set_active_account(None);

	assert_eq!(
		collect_events(&mut events, 1).await,
		vec![PortfolioEvent::ActiveAccountChanged(None)]
	);
	assert_eq!(h.handle.active_account(), None);
}

#[tokio::test]
async fn toggling_balance_hidden_persists_and_publishes() {
	let h = start(&[], SortType::Value);
	let mut events = h.handle.subscribe();

	assert!(!h.handle.balance_hidden().await.unwrap());
	assert!(h.handle.toggle_balance_hidden().await.unwrap());
	assert!(h.handle.balance_hidden().await.unwrap());
	assert!(h.preference_store.balance_hidden().await.unwrap());

	assert_eq!(
		drain(&mut events),
		vec![PortfolioEvent::BalanceHiddenChanged(true)]
	);
}

#[tokio::test]
async fn administrative_calls_reach_collaborators_without_touching_items() {
	let (h, a, _b, _c) = three_wallet_fixture();

	h.handle.disable(&a.wallet());
	h.handle.refresh();
	h.handle.notify_appear();
	h.handle.notify_disappear();

	assert_eq!(h.wallet_directory.deleted_wallets(), vec![a.wallet()]);
	assert_eq!(h.wallet_directory.refresh_count(), 1);
	assert_eq!(h.rate_oracle.refresh_count(), 1);
	assert_eq!(h.notifier.appeared(), 1);
	assert_eq!(h.notifier.disappeared(), 1);
	assert!(h.handle.item(&a.wallet()).await.unwrap().is_some());
	assert_eq!(h.handle.current_items().len(), 3);
}

#[tokio::test]
async fn late_subscribers_get_current_state_but_no_history() {
	let (h, a, _b, _c) = three_wallet_fixture();
	h.handle
		.wallet_facet_changed(a.wallet(), WalletFacet::NetworkType(false))
		.await
		.unwrap();
	h.handle.stats().await.unwrap();

	let mut events = h.handle.subscribe();
	assert!(drain(&mut events).is_empty());
	assert!(!h.handle.watch_items().borrow()[0].is_main_net);
	assert_eq!(
		h.handle.watch_total_item().borrow().as_ref().map(|t| t.amount),
		Some(dec!(23))
	);
}

struct Collector {
	seen: Arc<Mutex<Vec<PortfolioEvent>>>,
}

#[async_trait::async_trait]
impl PortfolioEventHandler for Collector {
	async fn handle(&mut self, event: &PortfolioEvent) {
		self.seen.lock().unwrap().push(event.clone());
	}

	fn name(&self) -> &'static str {
		"Collector"
	}
}

#[tokio::test]
async fn registered_handler_sees_item_updates() {
	let (h, a, _b, _c) = three_wallet_fixture();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let _registration = h.handle.register_handler(Box::new(Collector { seen: seen.clone() }));

	h.handle
		.wallet_facet_changed(a.wallet(), WalletFacet::Balance(BalanceData::new(dec!(1))))
		.await
		.unwrap();
	h.handle.stats().await.unwrap();

	for _ in 0..200 {
		if seen.lock().unwrap().len() >= 2 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	let seen = seen.lock().unwrap();
	assert!(matches!(&seen[0], PortfolioEvent::ItemUpdated(item) if item.wallet == a.wallet()));
	assert!(matches!(&seen[1], PortfolioEvent::TotalItemChanged(Some(total)) if total.amount == dec!(5)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_lookup_is_serviced_in_order() {
	let (h, a, _b, _c) = three_wallet_fixture();
	h.handle
		.wallet_facet_changed(a.wallet(), WalletFacet::Balance(BalanceData::new(dec!(42))))
		.await
		.unwrap();

	let handle = h.handle.clone();
	let wallet = a.wallet();
	let item = tokio::task::spawn_blocking(move || handle.item_blocking(&wallet))
		.await
		.unwrap()
		.unwrap()
		.unwrap();

	assert_eq!(item.balance_data.balance, dec!(42));
}

#[tokio::test]
async fn calls_after_shutdown_report_a_stopped_engine() {
	let (h, a, _b, _c) = three_wallet_fixture();

	h.handle.shutdown().await.unwrap();

	assert!(matches!(
		h.handle.item(&a.wallet()).await,
		Err(PortfolioError::EngineStopped)
	));
	assert!(matches!(
		h.handle.sort_type_changed(SortType::Name).await,
		Err(PortfolioError::EngineStopped)
	));
	assert_eq!(h.handle.current_items().len(), 3);
}

#[tokio::test]
async fn lagging_rate_notifications_resync_from_the_oracle() {
	let btc = test_wallet("Bitcoin", CoinType::Bitcoin, dec!(1));
	let dash = test_wallet("Dash", CoinType::Dash, dec!(1));
	let h = start(&[&btc, &dash], SortType::Manual);

	// More pushes than the notification buffer holds, without yielding to the forwarder
	h.rate_oracle.push_rates(HashMap::from([(
		CoinType::Bitcoin,
		RateItem::new(dec!(100), false),
	)]));
	for _ in 0..100 {
		h.rate_oracle.push_rates(HashMap::from([(
			CoinType::Dash,
			RateItem::new(dec!(5), false),
		)]));
	}

	let rate_of = |code: &str| {
		h.handle
			.current_items()
			.into_iter()
			.find(|item| item.wallet.coin.code == code)
			.and_then(|item| item.rate_item)
			.map(|rate_item| rate_item.rate)
	};
	eventually(&h.handle, || {
		rate_of("BITCOIN") == Some(dec!(100)) && rate_of("DASH") == Some(dec!(5))
	})
	.await;

	let total = h.handle.current_total_item().unwrap();
	assert_eq!(total.amount, dec!(105));
	assert!(!total.expired);
	assert_invariants(&h.handle);
}

#[tokio::test]
async fn overflowing_balance_does_not_stop_the_engine() {
	let btc = test_wallet("Bitcoin", CoinType::Bitcoin, dec!(1));
	let dash = test_wallet("Dash", CoinType::Dash, dec!(10));
	let h = start_with_rates(
		&[&btc, &dash],
		SortType::Value,
		&[
			(CoinType::Bitcoin, RateItem::new(dec!(2), false)),
			(CoinType::Dash, RateItem::new(dec!(3), false)),
		],
	);
	let huge = Decimal::MAX / dec!(1.5);

	h.handle
		.wallet_facet_changed(btc.wallet(), WalletFacet::Balance(BalanceData::new(huge)))
		.await
		.unwrap();

	let item = h.handle.item(&btc.wallet()).await.unwrap().unwrap();
	assert_eq!(item.balance_data.balance, huge);
	let total = h.handle.current_total_item().unwrap();
	assert_eq!(total.amount, dec!(30));
	assert!(total.expired);

	h.handle
		.wallet_facet_changed(btc.wallet(), WalletFacet::Balance(BalanceData::new(dec!(1))))
		.await
		.unwrap();
	h.handle.stats().await.unwrap();
	let total = h.handle.current_total_item().unwrap();
	assert_eq!(total.amount, dec!(32));
	assert!(!total.expired);
	assert_invariants(&h.handle);
}
