//! Serial executor of the portfolio engine.
//!
//! `PortfolioEngine` owns the canonical item list, the derived total, the current sort mode and
//! the per-wallet subscription set. It runs on a single task and processes `EngineCommand`s one
//! at a time in arrival order, so no two mutations ever overlap and every published event
//! reflects a fully applied mutation.
//!
//! Invariants kept after every command:
//! - there is exactly one item per wallet of the most recently announced active set,
//! - the item list is sorted for the current sort mode,
//! - the total is a full re-derivation from the current items.

use crate::collaborators::{AccountDirectory, FeeCoinProvider, RateOracle};
use crate::portfolio::sync::aggregate;
use crate::portfolio::sync::events::{EngineCommand, EventPublisher, PortfolioEvent};
use crate::portfolio::sync::sorter::WalletSorter;
use crate::portfolio::sync::stats::EngineStatsTracker;
use crate::portfolio::sync::subscriptions::{FacetReceivers, WalletSubscriptions};
use crate::portfolio::types::{
    Account, ActiveWallet, CoinType, ItemId, PortfolioItem, RateItem, SortType, TotalItem, Wallet,
    WalletFacet,
};

use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) struct PortfolioEngine {
    rate_oracle: Arc<dyn RateOracle>,
    account_directory: Arc<dyn AccountDirectory>,
    fee_coin_provider: Arc<dyn FeeCoinProvider>,
    publisher: Arc<EventPublisher>,
    commands: mpsc::WeakSender<EngineCommand>,

    items: Vec<PortfolioItem>,
    /// Wallet identity to position in `items`, rebuilt after every reorder
    index: HashMap<Wallet, usize>,
    total_item: Option<TotalItem>,
    sort_type: SortType,
    sorter: WalletSorter,
    next_item_id: u64,

    subscriptions: WalletSubscriptions,
    /// Tasks forwarding upstream notifications into the command queue
    upstream: Vec<JoinHandle<()>>,
    stats: EngineStatsTracker,
}

impl PortfolioEngine {
    pub(crate) fn new(
        rate_oracle: Arc<dyn RateOracle>,
        account_directory: Arc<dyn AccountDirectory>,
        fee_coin_provider: Arc<dyn FeeCoinProvider>,
        publisher: Arc<EventPublisher>,
        commands: mpsc::WeakSender<EngineCommand>,
        sort_type: SortType,
        stats_log_interval: u64,
    ) -> Self {
        Self {
            rate_oracle,
            account_directory,
            fee_coin_provider,
            publisher,
            commands,
            items: Vec::new(),
            index: HashMap::new(),
            total_item: None,
            sort_type,
            sorter: WalletSorter::new(),
            next_item_id: 0,
            subscriptions: WalletSubscriptions::new(),
            upstream: Vec::new(),
            stats: EngineStatsTracker::new(stats_log_interval),
        }
    }

    pub(crate) fn attach_upstream(&mut self, tasks: Vec<JoinHandle<()>>) {
        self.upstream.extend(tasks);
    }

    /// Process commands until shutdown or until every command sender is gone.
    pub(crate) async fn run(mut self, mut receiver: mpsc::Receiver<EngineCommand>) {
        info!("Portfolio engine started with {} items", self.items.len());

        while let Some(command) = receiver.recv().await {
            if !self.apply(command) {
                break;
            }
        }

        self.stats.log_progress(true);
        info!("Portfolio engine stopped");
    }

    /// Apply one command. Returns `false` when the engine should stop.
    pub(crate) fn apply(&mut self, command: EngineCommand) -> bool {
        self.stats.record_command();
        debug!("Processing {}", command.name());

        match command {
            EngineCommand::ActiveWalletsChanged(active_wallets) => {
                self.sync_active_wallets(active_wallets);
            }
            EngineCommand::SortTypeChanged(sort_type) => self.handle_sort_type(sort_type),
            EngineCommand::WalletFacetChanged {
                generation,
                wallet,
                facet,
            } => {
                if generation.is_some_and(|g| g != self.subscriptions.generation()) {
                    debug!(
                        "Dropping {} update for {} from stale subscription",
                        facet.kind(),
                        wallet.coin.code
                    );
                    self.stats.record_stale_facet();
                } else {
                    self.handle_facet(&wallet, facet);
                }
            }
            EngineCommand::RatesUpdated(rates) => self.handle_rates(rates),
            EngineCommand::BaseCurrencyChanged => self.handle_base_currency(),
            EngineCommand::ActiveAccountChanged(account) => {
                self.publisher
                    .publish(PortfolioEvent::ActiveAccountChanged(account));
            }
            EngineCommand::AccountUpdated(account) => self.handle_account_updated(account),
            EngineCommand::AccountsLost(lost) => {
                if lost {
                    self.publisher.publish(PortfolioEvent::AccountsLost);
                }
            }
            EngineCommand::ItemLookup { wallet, reply } => {
                let _ = reply.send(self.item(&wallet).cloned());
            }
            EngineCommand::Stats { reply } => {
                let _ = reply.send(self.stats.get_stats());
            }
            EngineCommand::Shutdown => {
                info!("Portfolio engine shutdown requested");
                return false;
            }
        }

        self.stats.log_progress(false);
        true
    }

    /// Rebuild every item from the new active set.
    ///
    /// Old subscriptions are torn down before new ones are installed. Items are always built
    /// fresh, so wallets that survive the change get a new `ItemId`.
    pub(crate) fn sync_active_wallets(&mut self, active_wallets: Vec<ActiveWallet>) {
        self.subscriptions.cancel_all();

        let mut receivers = Vec::with_capacity(active_wallets.len());
        let mut items = Vec::with_capacity(active_wallets.len());

        for (position, active_wallet) in active_wallets.into_iter().enumerate() {
            let ActiveWallet {
                wallet,
                mut is_main_net,
                mut balance_data,
                mut state,
            } = active_wallet;

            let rate_item = self.rate_oracle.current_rate(wallet.coin_type());
            let item = PortfolioItem {
                id: self.next_id(),
                wallet: wallet.clone(),
                is_main_net: *is_main_net.borrow_and_update(),
                balance_data: balance_data.borrow_and_update().clone(),
                state: state.borrow_and_update().clone(),
                rate_item,
                position,
            };

            items.push(item);
            receivers.push(FacetReceivers {
                wallet,
                is_main_net,
                balance_data,
                state,
            });
        }

        self.sorter.sort(&mut items, self.sort_type);
        self.items = items;
        self.reindex();
        self.stats.record_rebuild();

        self.sync_total_item();
        self.publish_items();

        self.subscriptions.replace(&self.commands, receivers);
        self.rate_oracle.set_coin_types(self.tracked_coin_types());

        info!(
            "Rebuilt portfolio with {} items, {} facet subscriptions (generation {})",
            self.items.len(),
            self.subscriptions.len(),
            self.subscriptions.generation()
        );
    }

    fn handle_sort_type(&mut self, sort_type: SortType) {
        self.sort_type = sort_type;
        self.sorter.sort(&mut self.items, sort_type);
        self.reindex();
        self.publish_items();
        debug!("Re-sorted {} items by {:?}", self.items.len(), sort_type);
    }

    fn handle_facet(&mut self, wallet: &Wallet, facet: WalletFacet) {
        let Some(&position) = self.index.get(wallet) else {
            debug!(
                "Ignoring {} update for inactive wallet {}",
                facet.kind(),
                wallet.coin.code
            );
            return;
        };

        let item = &mut self.items[position];
        let recompute_total = match facet {
            WalletFacet::NetworkType(is_main_net) => {
                item.is_main_net = is_main_net;
                false
            }
            WalletFacet::Balance(balance_data) => {
                item.balance_data = balance_data;
                true
            }
            WalletFacet::State(state) => {
                let was_synced = item.state.is_synced();
                item.state = state;
                was_synced != item.state.is_synced()
            }
        };

        let updated = item.clone();
        self.publisher.store_items(&self.items);
        self.publish_item_updated(updated);

        if recompute_total {
            self.sync_total_item();
        }
    }

    fn handle_rates(&mut self, rates: HashMap<CoinType, RateItem>) {
        let mut updated = Vec::new();

        for item in self.items.iter_mut() {
            if let Some(rate_item) = rates.get(item.wallet.coin_type()) {
                item.rate_item = Some(rate_item.clone());
                updated.push(item.clone());
            }
        }

        if !updated.is_empty() {
            self.publisher.store_items(&self.items);
        }
        for item in updated {
            self.publish_item_updated(item);
        }

        self.sync_total_item();
    }

    fn handle_base_currency(&mut self) {
        for item in self.items.iter_mut() {
            item.rate_item = self.rate_oracle.current_rate(item.wallet.coin_type());
        }

        self.sorter.sort(&mut self.items, self.sort_type);
        self.reindex();
        self.sync_total_item();
        self.publish_items();
        info!(
            "Base currency changed to {}",
            self.rate_oracle.currency().code
        );
    }

    fn handle_account_updated(&self, account: Account) {
        let is_active = self
            .account_directory
            .active_account()
            .is_some_and(|active| active.id == account.id);

        if is_active {
            self.publisher
                .publish(PortfolioEvent::ActiveAccountChanged(Some(account)));
        }
    }

    pub(crate) fn item(&self, wallet: &Wallet) -> Option<&PortfolioItem> {
        self.index
            .get(wallet)
            .and_then(|&position| self.items.get(position))
    }

    fn sync_total_item(&mut self) {
        let total_item = aggregate::total_item(&self.items, &self.rate_oracle.currency());
        self.total_item = Some(total_item.clone());
        self.stats.record_total_recompute();

        self.publisher.store_total_item(Some(total_item.clone()));
        self.publisher
            .publish(PortfolioEvent::TotalItemChanged(Some(total_item)));
    }

    fn publish_items(&self) {
        self.publisher.store_items(&self.items);
        self.publisher
            .publish(PortfolioEvent::ItemsChanged(self.items.clone()));
    }

    fn publish_item_updated(&mut self, item: PortfolioItem) {
        self.stats.record_item_update();
        self.publisher.publish(PortfolioEvent::ItemUpdated(item));
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| (item.wallet.clone(), position))
            .collect();
    }

    fn next_id(&mut self) -> ItemId {
        self.next_item_id += 1;
        ItemId(self.next_item_id)
    }

    /// Wallet coin types followed by their fee coin types, without duplicates.
    fn tracked_coin_types(&self) -> Vec<CoinType> {
        let coin_types = self.items.iter().map(|item| item.wallet.coin_type().clone());
        let fee_coin_types = self
            .items
            .iter()
            .filter_map(|item| self.fee_coin_provider.fee_coin_type(&item.wallet.coin));

        coin_types.chain(fee_coin_types).unique().collect()
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> &[PortfolioItem] {
        &self.items
    }

    #[cfg(test)]
    pub(crate) fn total(&self) -> Option<&TotalItem> {
        self.total_item.as_ref()
    }
}

impl Drop for PortfolioEngine {
    fn drop(&mut self) {
        self.subscriptions.cancel_all();
        for task in self.upstream.drain(..) {
            task.abort();
        }
    }
}
