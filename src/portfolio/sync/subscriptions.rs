//! Per-wallet facet subscriptions.
//!
//! Each active wallet gets one forwarding task per facet. A task waits on the facet's `watch`
//! receiver and turns every change into an `EngineCommand::WalletFacetChanged` tagged with the
//! generation of the subscription set that spawned it. The whole set is swapped on every wallet
//! list change: the old tasks are aborted before new ones are installed, and the engine drops
//! any already queued command whose generation is no longer current.

use crate::portfolio::sync::events::EngineCommand;
use crate::portfolio::types::{BalanceData, SyncState, Wallet, WalletFacet};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Facet receivers for one wallet, already marked as seen at their current value.
pub(crate) struct FacetReceivers {
    pub wallet: Wallet,
    pub is_main_net: watch::Receiver<bool>,
    pub balance_data: watch::Receiver<BalanceData>,
    pub state: watch::Receiver<SyncState>,
}

pub(crate) struct WalletSubscriptions {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

impl WalletSubscriptions {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Tear down every existing subscription, then install one per facet of each wallet.
    pub(crate) fn replace(
        &mut self,
        commands: &mpsc::WeakSender<EngineCommand>,
        wallets: Vec<FacetReceivers>,
    ) {
        self.cancel_all();
        self.generation += 1;
        let generation = self.generation;

        for receivers in wallets {
            self.tasks.push(spawn_forwarder(
                commands.clone(),
                generation,
                receivers.wallet.clone(),
                receivers.is_main_net,
                WalletFacet::NetworkType,
            ));
            self.tasks.push(spawn_forwarder(
                commands.clone(),
                generation,
                receivers.wallet.clone(),
                receivers.balance_data,
                WalletFacet::Balance,
            ));
            self.tasks.push(spawn_forwarder(
                commands.clone(),
                generation,
                receivers.wallet,
                receivers.state,
                WalletFacet::State,
            ));
        }

        debug!(
            "Installed {} facet subscriptions (generation {})",
            self.tasks.len(),
            generation
        );
    }

    pub(crate) fn cancel_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for WalletSubscriptions {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn spawn_forwarder<T>(
    commands: mpsc::WeakSender<EngineCommand>,
    generation: u64,
    wallet: Wallet,
    mut receiver: watch::Receiver<T>,
    facet: fn(T) -> WalletFacet,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let value = receiver.borrow_and_update().clone();
            let Some(sender) = commands.upgrade() else {
                break;
            };
            let command = EngineCommand::WalletFacetChanged {
                generation: Some(generation),
                wallet: wallet.clone(),
                facet: facet(value),
            };
            if sender.send(command).await.is_err() {
                break;
            }
        }
    })
}
