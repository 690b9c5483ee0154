//!
//! Utility module for the portfolio engine.
//!
//! Re-exports formatting helpers used in logs.
/// Utility functions for formatting and display
pub mod index;

pub use index::format_fiat_amount;
