pub mod sync;
pub mod types;

pub use sync::{PortfolioHandle, PortfolioService};
pub use types::*;
