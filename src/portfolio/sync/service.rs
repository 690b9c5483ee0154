//! Public entry point of the portfolio engine.
//!
//! `PortfolioService::start` builds the initial portfolio from the wallet directory, spawns the
//! serial executor and wires every collaborator's notifications into its command queue. The
//! returned `PortfolioHandle` is the only way to talk to the engine: queries that must observe
//! a consistent state go through the queue, standing state is read from `watch` channels, and
//! administrative calls are passed straight to the collaborators.

use crate::collaborators::{
	AccountDirectory, AccountEvent, FeeCoinProvider, PreferenceStore, RateAppNotifier,
	RateEvent, RateOracle, SortTypeSource, WalletDirectory,
};
use crate::portfolio::sync::engine::PortfolioEngine;
use crate::portfolio::sync::events::{
	EngineCommand, EventPublisher, HandlerRegistration, PortfolioEvent, PortfolioEventHandler,
	register_handler,
};
use crate::portfolio::sync::stats::EngineStats;
use crate::portfolio::types::{
	Account, ActiveWallet, CoinType, PortfolioError, PortfolioItem, RateItem, SortType,
	TotalItem, Wallet, WalletFacet,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for the portfolio engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Capacity of the inbound command queue
	pub command_buffer: usize,
	/// Capacity of the broadcast channel for discrete events
	pub event_capacity: usize,
	/// Log engine counters every N commands, 0 disables it
	pub stats_log_interval: u64,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			command_buffer: 1024,
			event_capacity: 256,
			stats_log_interval: 500,
		}
	}
}

/// Collaborators the engine is built from
#[derive(Clone)]
pub struct Collaborators {
	pub rate_oracle: Arc<dyn RateOracle>,
	pub wallet_directory: Arc<dyn WalletDirectory>,
	pub account_directory: Arc<dyn AccountDirectory>,
	pub sort_type_source: Arc<dyn SortTypeSource>,
	pub preference_store: Arc<dyn PreferenceStore>,
	pub rate_app_notifier: Arc<dyn RateAppNotifier>,
	pub fee_coin_provider: Arc<dyn FeeCoinProvider>,
}

pub struct PortfolioService;

impl PortfolioService {
	/// Build the initial portfolio and start the engine. Must be called within a tokio runtime.
	///
	/// The initial items and total are published before this returns.
	pub fn start(collaborators: Collaborators, config: EngineConfig) -> PortfolioHandle {
		let (commands, receiver) = mpsc::channel(config.command_buffer.max(1));
		let publisher = Arc::new(EventPublisher::new(config.event_capacity));

		let mut engine = PortfolioEngine::new(
			collaborators.rate_oracle.clone(),
			collaborators.account_directory.clone(),
			collaborators.fee_coin_provider.clone(),
			publisher.clone(),
			commands.downgrade(),
			collaborators.sort_type_source.sort_type(),
			config.stats_log_interval,
		);

		// Subscribe before the initial read so no list change can slip between the two
		let wallet_updates = collaborators.wallet_directory.subscribe();
		let rate_updates = collaborators.rate_oracle.subscribe();
		let account_updates = collaborators.account_directory.subscribe();
		let sort_updates = collaborators.sort_type_source.subscribe();

		engine.sync_active_wallets(collaborators.wallet_directory.active_wallets());

		let weak = commands.downgrade();
		let wallet_directory = collaborators.wallet_directory.clone();
		let account_directory = collaborators.account_directory.clone();
		let sort_type_source = collaborators.sort_type_source.clone();
		engine.attach_upstream(vec![
			forward(
				wallet_updates,
				weak.clone(),
				"wallet directory",
				EngineCommand::ActiveWalletsChanged,
				move || EngineCommand::ActiveWalletsChanged(wallet_directory.active_wallets()),
			),
			forward(
				rate_updates,
				weak.clone(),
				"rate oracle",
				|event: RateEvent| match event {
					RateEvent::RatesUpdated(rates) => EngineCommand::RatesUpdated(rates),
					RateEvent::BaseCurrencyChanged => EngineCommand::BaseCurrencyChanged,
				},
				// Re-pulls every item's rate from the oracle
				|| EngineCommand::BaseCurrencyChanged,
			),
			forward(
				account_updates,
				weak.clone(),
				"account directory",
				|event: AccountEvent| match event {
					AccountEvent::ActiveAccountChanged(account) => {
						EngineCommand::ActiveAccountChanged(account)
					}
					AccountEvent::AccountUpdated(account) => EngineCommand::AccountUpdated(account),
					AccountEvent::AccountsLost(lost) => EngineCommand::AccountsLost(lost),
				},
				move || EngineCommand::ActiveAccountChanged(account_directory.active_account()),
			),
			forward(
				sort_updates,
				weak,
				"sort selector",
				EngineCommand::SortTypeChanged,
				move || EngineCommand::SortTypeChanged(sort_type_source.sort_type()),
			),
		]);

		let task = tokio::spawn(engine.run(receiver));
		info!("Portfolio service started");

		PortfolioHandle {
			commands,
			publisher,
			collaborators,
			task: Arc::new(std::sync::Mutex::new(Some(task))),
		}
	}
}

/// Forward a collaborator's notifications into the command queue.
///
/// When the receiver lags, the skipped notifications are replaced by `resync`, a command built
/// from the collaborator's current state.
fn forward<T, F, R>(
	mut receiver: broadcast::Receiver<T>,
	commands: mpsc::WeakSender<EngineCommand>,
	source: &'static str,
	to_command: F,
	resync: R,
) -> JoinHandle<()>
where
	T: Clone + Send + 'static,
	F: Fn(T) -> EngineCommand + Send + 'static,
	R: Fn() -> EngineCommand + Send + 'static,
{
	tokio::spawn(async move {
		loop {
			let command = match receiver.recv().await {
				Ok(value) => to_command(value),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!(
						"Lagged behind {}, skipped {} notifications, resyncing",
						source, skipped
					);
					resync()
				}
				Err(broadcast::error::RecvError::Closed) => break,
			};

			let Some(sender) = commands.upgrade() else {
				break;
			};
			if sender.send(command).await.is_err() {
				break;
			}
		}
	})
}

/// Cloneable handle on a running portfolio engine.
///
/// The engine stops when `shutdown` is called or when every handle has been dropped.
#[derive(Clone)]
pub struct PortfolioHandle {
	commands: mpsc::Sender<EngineCommand>,
	publisher: Arc<EventPublisher>,
	collaborators: Collaborators,
	task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl PortfolioHandle {
	async fn send(&self, command: EngineCommand) -> Result<(), PortfolioError> {
		self.commands
			.send(command)
			.await
			.map_err(|_| PortfolioError::EngineStopped)
	}

	// Outbound

	/// Subscribe to discrete events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<PortfolioEvent> {
		self.publisher.subscribe()
	}

	pub fn register_handler(&self, handler: Box<dyn PortfolioEventHandler>) -> HandlerRegistration {
		register_handler(self.publisher.subscribe(), handler)
	}

	pub fn watch_items(&self) -> watch::Receiver<Vec<PortfolioItem>> {
		self.publisher.watch_items()
	}

	pub fn watch_total_item(&self) -> watch::Receiver<Option<TotalItem>> {
		self.publisher.watch_total_item()
	}

	// Queries

	pub fn current_items(&self) -> Vec<PortfolioItem> {
		self.publisher.watch_items().borrow().clone()
	}

	pub fn current_total_item(&self) -> Option<TotalItem> {
		self.publisher.watch_total_item().borrow().clone()
	}

	/// Look up the item of a wallet, after every command queued before this call.
	pub async fn item(&self, wallet: &Wallet) -> Result<Option<PortfolioItem>, PortfolioError> {
		let (reply, response) = oneshot::channel();
		self.send(EngineCommand::ItemLookup {
			wallet: wallet.clone(),
			reply,
		})
		.await?;
		response.await.map_err(|_| PortfolioError::EngineStopped)
	}

	/// Blocking variant of [`item`](Self::item) for callers outside the runtime.
	///
	/// Panics if called from within an async context, like every tokio blocking call.
	pub fn item_blocking(&self, wallet: &Wallet) -> Result<Option<PortfolioItem>, PortfolioError> {
		let (reply, response) = oneshot::channel();
		self.commands
			.blocking_send(EngineCommand::ItemLookup {
				wallet: wallet.clone(),
				reply,
			})
			.map_err(|_| PortfolioError::EngineStopped)?;
		response
			.blocking_recv()
			.map_err(|_| PortfolioError::EngineStopped)
	}

	pub async fn stats(&self) -> Result<EngineStats, PortfolioError> {
		let (reply, response) = oneshot::channel();
		self.send(EngineCommand::Stats { reply }).await?;
		response.await.map_err(|_| PortfolioError::EngineStopped)
	}

	pub fn active_account(&self) -> Option<Account> {
		self.collaborators.account_directory.active_account()
	}

	pub async fn balance_hidden(&self) -> Result<bool, PortfolioError> {
		self.collaborators.preference_store.balance_hidden().await
	}

	// Inbound

	pub async fn active_wallets_changed(
		&self,
		active_wallets: Vec<ActiveWallet>,
	) -> Result<(), PortfolioError> {
		self.send(EngineCommand::ActiveWalletsChanged(active_wallets))
			.await
	}

	pub async fn sort_type_changed(&self, sort_type: SortType) -> Result<(), PortfolioError> {
		self.send(EngineCommand::SortTypeChanged(sort_type)).await
	}

	pub async fn wallet_facet_changed(
		&self,
		wallet: Wallet,
		facet: WalletFacet,
	) -> Result<(), PortfolioError> {
		self.send(EngineCommand::WalletFacetChanged {
			generation: None,
			wallet,
			facet,
		})
		.await
	}

	pub async fn rates_updated(
		&self,
		rates: HashMap<CoinType, RateItem>,
	) -> Result<(), PortfolioError> {
		self.send(EngineCommand::RatesUpdated(rates)).await
	}

	pub async fn base_currency_changed(&self) -> Result<(), PortfolioError> {
		self.send(EngineCommand::BaseCurrencyChanged).await
	}

	// Administrative

	pub async fn toggle_balance_hidden(&self) -> Result<bool, PortfolioError> {
		let store = &self.collaborators.preference_store;
		let hidden = !store.balance_hidden().await?;
		store.set_balance_hidden(hidden).await?;

		self.publisher
			.publish(PortfolioEvent::BalanceHiddenChanged(hidden));
		Ok(hidden)
	}

	pub fn refresh(&self) {
		self.collaborators.wallet_directory.refresh_wallets();
		self.collaborators.rate_oracle.refresh();
	}

	/// Ask the wallet directory to remove `wallet`. The item stays until the directory
	/// announces the new active set.
	pub fn disable(&self, wallet: &Wallet) {
		self.collaborators
			.wallet_directory
			.delete(std::slice::from_ref(wallet));
	}

	pub fn notify_appear(&self) {
		self.collaborators.rate_app_notifier.on_balance_page_appear();
	}

	pub fn notify_disappear(&self) {
		self.collaborators
			.rate_app_notifier
			.on_balance_page_disappear();
	}

	/// Stop the engine after every command queued before this call, and wait for it.
	pub async fn shutdown(&self) -> Result<(), PortfolioError> {
		self.send(EngineCommand::Shutdown).await?;

		let task = self
			.task
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				warn!("Portfolio engine task ended abnormally: {}", e);
			}
		}
		Ok(())
	}
}
