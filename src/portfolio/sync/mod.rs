//! Portfolio synchronization engine.
//!
//! This module keeps a consistent, continuously updated view of the active wallets, what they
//! are worth and whether that worth can be trusted. It is composed of several submodules:
//!
//! - `service`: The public entry point. Starts the engine and hands out `PortfolioHandle`s.
//! - `engine`: The serial executor owning items, total, sort mode and wallet subscriptions.
//! - `events`: Inbound commands, outbound events, and handler registration.
//! - `subscriptions`: Per-wallet facet subscriptions, swapped atomically on list changes.
//! - `sorter`: Stable sort policy for portfolio items.
//! - `aggregate`: Derivation of the total portfolio value and its expiry flag.
//! - `stats`: Engine counters and periodic progress logging.

/// Total portfolio value derivation
pub mod aggregate;
/// Serial executor for all portfolio mutations
pub mod engine;
/// Event system for inbound commands and outbound notifications
pub mod events;
/// Engine entry point and handle
pub mod service;
/// Stable sort policy
pub mod sorter;
/// Engine counters
pub mod stats;
/// Per-wallet facet subscriptions
pub mod subscriptions;

pub use events::{HandlerRegistration, LoggingEventHandler, PortfolioEvent, PortfolioEventHandler};
pub use service::{Collaborators, EngineConfig, PortfolioHandle, PortfolioService};
pub use sorter::WalletSorter;
pub use stats::EngineStats;
