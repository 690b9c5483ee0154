use portfolio_sync::collaborators::TokenFeeCoinProvider;
use portfolio_sync::collaborators::memory::{
	CountingRateAppNotifier, InMemoryAccountDirectory, InMemoryPreferenceStore, InMemoryRateOracle,
	InMemorySortTypeSource, InMemoryWalletDirectory,
};
use portfolio_sync::portfolio::sync::LoggingEventHandler;
use portfolio_sync::utils::format_fiat_amount;
use portfolio_sync::{
	Account, ActiveWallet, BalanceData, Coin, CoinType, Collaborators, Currency, EngineConfig,
	PortfolioService, RateItem, SortType, SyncState, Wallet,
};

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

fn coin(title: &str, code: &str, coin_type: CoinType) -> Coin {
	Coin {
		title: title.to_string(),
		code: code.to_string(),
		decimals: 8,
		coin_type,
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting portfolio sync demo");

	let account = Account {
		id: "main".to_string(),
		name: "Wallet 1".to_string(),
		backed_up: true,
	};
	let usdt = CoinType::Erc20 {
		address: "0xdac17f958d2ee523a2206206994597c13d831ec7".to_string(),
	};

	let (bitcoin, bitcoin_feed) = ActiveWallet::channel(
		Wallet::new(&account.id, coin("Bitcoin", "BTC", CoinType::Bitcoin)),
		true,
		BalanceData::new(Decimal::new(5, 1)),
		SyncState::Syncing {
			progress: 80,
			last_block_date: None,
		},
	);
	let (tether, _tether_feed) = ActiveWallet::channel(
		Wallet::new(&account.id, coin("Tether USD", "USDT", usdt.clone())),
		true,
		BalanceData::new(Decimal::new(1200, 0)),
		SyncState::Synced,
	);

	let rate_oracle = Arc::new(InMemoryRateOracle::new(Currency::new("USD", "$", 2)));
	rate_oracle.insert_rate("USD", CoinType::Bitcoin, RateItem::new(Decimal::new(60000, 0), false));
	rate_oracle.insert_rate("EUR", CoinType::Bitcoin, RateItem::new(Decimal::new(55000, 0), false));
	rate_oracle.insert_rate("EUR", usdt.clone(), RateItem::new(Decimal::new(92, 2), false));

	let wallet_directory = Arc::new(InMemoryWalletDirectory::new(vec![
		bitcoin.clone(),
		tether.clone(),
	]));
	let account_directory = Arc::new(InMemoryAccountDirectory::new(Some(account.clone())));
	let sort_type_source = Arc::new(InMemorySortTypeSource::new(SortType::Value));

	let handle = PortfolioService::start(
		Collaborators {
			rate_oracle: rate_oracle.clone(),
			wallet_directory: wallet_directory.clone(),
			account_directory: account_directory.clone(),
			sort_type_source: sort_type_source.clone(),
			preference_store: Arc::new(InMemoryPreferenceStore::default()),
			rate_app_notifier: Arc::new(CountingRateAppNotifier::default()),
			fee_coin_provider: Arc::new(TokenFeeCoinProvider),
		},
		EngineConfig::default(),
	);
	let _logger = handle.register_handler(Box::new(LoggingEventHandler));

	rate_oracle.push_rates(HashMap::from([(usdt.clone(), RateItem::new(Decimal::ONE, false))]));
	bitcoin_feed.set_state(SyncState::Synced);
	bitcoin_feed.set_balance(BalanceData::new(Decimal::new(75, 2)));
	sort_type_source.select(SortType::Name);
	rate_oracle.set_currency(Currency::new("EUR", "€", 2));
	wallet_directory.set_active_wallets(vec![bitcoin]);

	if let Err(e) = handle.toggle_balance_hidden().await {
		error!("Failed to toggle balance visibility: {}", e);
	}

	// Let the forwarders drain into the queue, then barrier on the executor
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	match handle.stats().await {
		Ok(stats) => info!("Engine stats: {}", stats.summary()),
		Err(e) => error!("Failed to read engine stats: {}", e),
	}

	if let Some(total) = handle.current_total_item() {
		info!(
			"Final total: {}{}",
			format_fiat_amount(total.amount, &total.currency),
			if total.expired { " (expired)" } else { "" }
		);
	}
	match serde_json::to_string_pretty(&handle.current_items()) {
		Ok(json) => info!("Final items:\n{}", json),
		Err(e) => error!("Failed to serialize items: {}", e),
	}

	if let Err(e) = handle.shutdown().await {
		error!("Failed to stop portfolio engine: {}", e);
	}
}
