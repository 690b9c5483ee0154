//! Event system for the portfolio engine.
//!
//! Inbound, every producer (wallet directory, per-wallet facet streams, rate oracle, account
//! directory, sort selector, and handle callers) talks to the engine through `EngineCommand`s on
//! a single queue. Outbound, the engine publishes `PortfolioEvent`s on a broadcast channel.
//! Handlers registered through `register_handler` receive every event published after their
//! registration until the returned `HandlerRegistration` is unregistered or dropped.

use crate::portfolio::sync::stats::EngineStats;
use crate::portfolio::types::{
    Account, ActiveWallet, CoinType, PortfolioItem, RateItem, SortType, TotalItem, Wallet,
    WalletFacet,
};

use std::collections::HashMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Commands processed by the serial executor, strictly in arrival order
pub(crate) enum EngineCommand {
    ActiveWalletsChanged(Vec<ActiveWallet>),
    SortTypeChanged(SortType),
    WalletFacetChanged {
        /// Subscription generation that produced the event; `None` for direct callers
        generation: Option<u64>,
        wallet: Wallet,
        facet: WalletFacet,
    },
    RatesUpdated(HashMap<CoinType, RateItem>),
    BaseCurrencyChanged,
    ActiveAccountChanged(Option<Account>),
    AccountUpdated(Account),
    AccountsLost(bool),
    ItemLookup {
        wallet: Wallet,
        reply: oneshot::Sender<Option<PortfolioItem>>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    Shutdown,
}

impl EngineCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            EngineCommand::ActiveWalletsChanged(_) => "active-wallets-changed",
            EngineCommand::SortTypeChanged(_) => "sort-type-changed",
            EngineCommand::WalletFacetChanged { .. } => "wallet-facet-changed",
            EngineCommand::RatesUpdated(_) => "rates-updated",
            EngineCommand::BaseCurrencyChanged => "base-currency-changed",
            EngineCommand::ActiveAccountChanged(_) => "active-account-changed",
            EngineCommand::AccountUpdated(_) => "account-updated",
            EngineCommand::AccountsLost(_) => "accounts-lost",
            EngineCommand::ItemLookup { .. } => "item-lookup",
            EngineCommand::Stats { .. } => "stats",
            EngineCommand::Shutdown => "shutdown",
        }
    }
}

/// Events published by the engine after the triggering mutation has committed
#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioEvent {
    ActiveAccountChanged(Option<Account>),
    BalanceHiddenChanged(bool),
    AccountsLost,
    TotalItemChanged(Option<TotalItem>),
    ItemUpdated(PortfolioItem),
    ItemsChanged(Vec<PortfolioItem>),
}

/// Trait for consuming portfolio events.
///
/// Handlers run on their own task, so a slow handler only delays itself.
#[async_trait::async_trait]
pub trait PortfolioEventHandler: Send + Sync {
    async fn handle(&mut self, event: &PortfolioEvent);

    /// Name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Registration of a handler.
///
/// Delivery stops when the registration is unregistered or dropped: both abort the handler's
/// task.
#[derive(Debug)]
pub struct HandlerRegistration {
    name: &'static str,
    task: JoinHandle<()>,
}

impl HandlerRegistration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn unregister(self) {
        drop(self);
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        debug!("Unregistering portfolio event handler {}", self.name);
        self.task.abort();
    }
}

/// Spawn a delivery task feeding `receiver` into `handler`.
pub(crate) fn register_handler(
    mut receiver: broadcast::Receiver<PortfolioEvent>,
    mut handler: Box<dyn PortfolioEventHandler>,
) -> HandlerRegistration {
    let name = handler.name();
    let task = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => handler.handle(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Handler {} lagged behind, skipped {} events", name, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    HandlerRegistration { name, task }
}

/// Fan-out point for outbound events and standing state.
///
/// Discrete events go out on a broadcast channel: sends never block and nothing is replayed to
/// late subscribers. Current items and total are kept in `watch` channels, which only hold the
/// latest value.
pub(crate) struct EventPublisher {
    events: broadcast::Sender<PortfolioEvent>,
    items: tokio::sync::watch::Sender<Vec<PortfolioItem>>,
    total_item: tokio::sync::watch::Sender<Option<TotalItem>>,
}

impl EventPublisher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (items, _) = tokio::sync::watch::channel(Vec::new());
        let (total_item, _) = tokio::sync::watch::channel(None);
        Self {
            events,
            items,
            total_item,
        }
    }

    pub(crate) fn publish(&self, event: PortfolioEvent) {
        // No receivers is fine: discrete events are fire-and-forget
        if self.events.send(event).is_err() {
            debug!("No portfolio event subscribers");
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PortfolioEvent> {
        self.events.subscribe()
    }

    pub(crate) fn store_items(&self, items: &[PortfolioItem]) {
        self.items.send_replace(items.to_vec());
    }

    pub(crate) fn store_total_item(&self, total_item: Option<TotalItem>) {
        self.total_item.send_replace(total_item);
    }

    pub(crate) fn watch_items(&self) -> tokio::sync::watch::Receiver<Vec<PortfolioItem>> {
        self.items.subscribe()
    }

    pub(crate) fn watch_total_item(&self) -> tokio::sync::watch::Receiver<Option<TotalItem>> {
        self.total_item.subscribe()
    }
}

/// Handler that logs every event. Used by the demo binary.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl PortfolioEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &PortfolioEvent) {
        match event {
            PortfolioEvent::TotalItemChanged(Some(total)) => tracing::info!(
                "Total: {}{}",
                crate::utils::format_fiat_amount(total.amount, &total.currency),
                if total.expired { " (expired)" } else { "" }
            ),
            PortfolioEvent::TotalItemChanged(None) => tracing::info!("Total: unavailable"),
            PortfolioEvent::ItemUpdated(item) => tracing::info!(
                "Item {} updated: balance {} (locked {}), synced {}",
                item.wallet.coin.code,
                item.balance_data.balance,
                item.balance_data.balance_locked,
                item.state.is_synced()
            ),
            PortfolioEvent::ItemsChanged(items) => tracing::info!(
                "Items: [{}]",
                items
                    .iter()
                    .map(|item| item.wallet.coin.code.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            PortfolioEvent::ActiveAccountChanged(account) => tracing::info!(
                "Active account: {}",
                account.as_ref().map(|a| a.name.as_str()).unwrap_or("none")
            ),
            PortfolioEvent::BalanceHiddenChanged(hidden) => {
                tracing::info!("Balance hidden: {}", hidden)
            }
            PortfolioEvent::AccountsLost => error!("Accounts lost"),
        }
    }

    fn name(&self) -> &'static str {
        "LoggingEventHandler"
    }
}
