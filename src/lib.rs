//! Wallet portfolio synchronization engine.
//!
//! Keeps the list of active wallets, their balances, rates and sync states, and the derived
//! portfolio total consistent under concurrent, unordered updates from the wallet directory,
//! the rate oracle, the account directory and the sort selector.

pub mod collaborators;
pub mod portfolio;
pub mod utils;

pub use portfolio::sync::{
	Collaborators, EngineConfig, EngineStats, HandlerRegistration, PortfolioEvent,
	PortfolioEventHandler, PortfolioHandle, PortfolioService,
};
pub use portfolio::types::*;
